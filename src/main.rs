use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use virtual_occupancy_bridge::capabilities::LogCapabilityPublisher;
use virtual_occupancy_bridge::config::{self, Config, RoomConfig, SensorConfig};
use virtual_occupancy_bridge::device::OccupancyDevice;
use virtual_occupancy_bridge::input::mqtt::MqttIntegration;
use virtual_occupancy_bridge::input::simulation::run_sensor_simulation;
use virtual_occupancy_bridge::instance_lock::InstanceLock;

#[derive(Parser)]
#[command(name = "virtual-occupancy-bridge")]
#[command(about = "Fuses zigbee2mqtt binary sensors into stable virtual room occupancy")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Run without a broker, driving rooms with simulated sensor events
    #[arg(long)]
    simulate: bool,

    /// Restrict simulation to a single room
    #[arg(long)]
    room: Option<String>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    config::load_dotenv();
    init_logger();

    let args = Args::parse();

    info!("Starting Virtual Occupancy Bridge");

    let _lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(e) => {
            error!("Failed to acquire instance lock: {}", e);
            std::process::exit(1);
        }
    };

    let config = Config::load(args.config.as_deref());
    info!("Configuration loaded:");
    info!(
        "  MQTT Broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Sweep interval: {}s", config.sweep_interval_secs);
    info!("  Rooms: {}", config.rooms.len());
    for room in &config.rooms {
        info!(
            "    {} ({} trigger(s), {} reset(s), confirm {}s)",
            room.name,
            room.trigger_sensors.len(),
            room.reset_sensors.len(),
            room.enter_delay_secs
        );
    }

    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();
    let mut sim_tasks: Vec<JoinHandle<()>> = Vec::new();

    if args.simulate {
        sim_tasks = start_simulation(&config, args.room.as_deref(), &tracker, &cancel);
    } else {
        MqttIntegration::new(config).start(&tracker, cancel.clone());
    }

    info!("Virtual Occupancy Bridge is running");
    info!("  - Press Ctrl+C to exit");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Shutdown: stop the simulators first, then drain the device tasks
    for task in sim_tasks {
        task.abort();
    }
    cancel.cancel();
    tracker.close();
    tracker.wait().await;

    info!("Virtual Occupancy Bridge stopped");
}

/// Spawn simulated devices for every (or one selected) room.
///
/// With no rooms configured, a demo room is fabricated so `--simulate`
/// shows the full pipeline out of the box.
fn start_simulation(
    config: &Config,
    only_room: Option<&str>,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let publisher = std::sync::Arc::new(LogCapabilityPublisher);
    let mut rooms = config.rooms.clone();
    if rooms.is_empty() {
        info!("No rooms configured, simulating a demo room");
        rooms.push(demo_room());
    }

    let mut tasks = Vec::new();
    for room in rooms {
        if only_room.is_some_and(|name| name != room.name) {
            continue;
        }
        let Some(motion) = room.trigger_sensors.first() else {
            warn!("Room '{}' has no trigger sensors, skipping simulation", room.name);
            continue;
        };
        let motion = motion.friendly_name.clone();
        let door = room.reset_sensors.first().map(|s| s.friendly_name.clone());

        let device = OccupancyDevice::spawn(
            room.to_engine_config(),
            config.sweep_interval(),
            publisher.clone(),
            tracker,
            cancel.child_token(),
        );
        tasks.push(run_sensor_simulation(
            device,
            motion,
            door,
            Duration::from_secs(30),
        ));
    }

    if tasks.is_empty() {
        warn!("Nothing to simulate");
    }
    tasks
}

fn demo_room() -> RoomConfig {
    RoomConfig {
        name: "demo-room".to_string(),
        trigger_sensors: vec![SensorConfig {
            friendly_name: "Demo-Motion".to_string(),
            property: "occupancy".to_string(),
            invert: false,
            display_name: None,
        }],
        reset_sensors: vec![SensorConfig {
            friendly_name: "Demo-Door".to_string(),
            property: "contact".to_string(),
            invert: true,
            display_name: None,
        }],
        sensor_timeout_secs: 120,
        enter_delay_secs: 15,
        clear_delay_secs: None,
        warm_start_occupied: None,
    }
}
