//! Test binary for exercising the bridge over a real broker.
//!
//! Usage:
//!   cargo run --bin mqtt-probe [friendly_name]
//!
//! This connects to the MQTT broker, tails everything the bridge
//! publishes under its base topic, and injects a synthetic motion
//! sequence (motion detected, motion cleared) for the given sensor so a
//! running bridge can be watched end to end.

use log::{info, warn};
use tokio::sync::{mpsc, oneshot};
use virtual_occupancy_bridge::config::{self, Config};
use virtual_occupancy_bridge::input::mqtt::MqttClient;

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    config::load_dotenv();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let friendly_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Demo-Motion".to_string());

    info!("Starting MQTT probe for sensor '{}'", friendly_name);

    // Load configuration
    let config = Config::load(None);
    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    // Create MQTT client
    let mqtt_client = MqttClient::new(&config.mqtt);
    let async_client = mqtt_client.client();

    // Create message channel and connection signal
    let (msg_tx, mut msg_rx) = mpsc::channel(100);
    let (connected_tx, connected_rx) = oneshot::channel();

    // Spawn MQTT event loop
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(msg_tx, Some(connected_tx)).await;
    });

    if connected_rx.await.is_err() {
        warn!("Connection signal dropped, exiting");
        return;
    }

    // Tail everything the bridge publishes
    let bridge_topic = format!("{}/#", config.mqtt.bridge_topic);
    if let Err(e) = async_client
        .subscribe(&bridge_topic, rumqttc::QoS::AtMostOnce)
        .await
    {
        warn!("Failed to subscribe to {}: {:?}", bridge_topic, e);
    }

    // Spawn message printer
    let printer = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            info!(">>> {}: {}", msg.topic, msg.payload);
        }
    });

    // Inject a synthetic motion sequence
    let state_topic = format!("{}/{}", config.mqtt.zigbee_topic, friendly_name);
    info!("Testing: motion detected on {}", state_topic);
    if let Err(e) = async_client
        .publish(
            &state_topic,
            rumqttc::QoS::AtMostOnce,
            false,
            r#"{"occupancy": true}"#,
        )
        .await
    {
        warn!("Failed to publish motion: {:?}", e);
    }

    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    info!("Testing: motion cleared on {}", state_topic);
    if let Err(e) = async_client
        .publish(
            &state_topic,
            rumqttc::QoS::AtMostOnce,
            false,
            r#"{"occupancy": false}"#,
        )
        .await
    {
        warn!("Failed to publish motion clear: {:?}", e);
    }

    info!("Listening for bridge state... Press Ctrl+C to exit.");

    // Wait for tasks (they run indefinitely)
    tokio::select! {
        _ = mqtt_handle => {
            warn!("MQTT event loop ended");
        }
        _ = printer => {
            warn!("Message printer ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    info!("Probe complete.");
}
