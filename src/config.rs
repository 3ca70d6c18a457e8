use crate::error::{BridgeError, Result};
use crate::fusion::{EngineConfig, SensorDescriptor, SensorRole};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: We're single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Staleness sweep cadence in seconds, shared by all rooms.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Base topic zigbee2mqtt publishes sensor state under.
    #[serde(default = "default_zigbee_topic")]
    pub zigbee_topic: String,
    /// Base topic this bridge publishes room state under.
    #[serde(default = "default_bridge_topic")]
    pub bridge_topic: String,
}

/// One virtual occupancy device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    /// Sensors whose rising edge signals presence (motion, presence radar).
    #[serde(default)]
    pub trigger_sensors: Vec<SensorConfig>,
    /// Sensors whose rising edge signals a possible exit (door contacts).
    #[serde(default)]
    pub reset_sensors: Vec<SensorConfig>,
    /// Per-sensor freshness timeout in seconds.
    #[serde(default = "default_sensor_timeout_secs")]
    pub sensor_timeout_secs: u64,
    /// Exit confirmation delay in seconds.
    #[serde(default = "default_enter_delay_secs")]
    pub enter_delay_secs: u64,
    /// Optional decay delay in seconds for trigger-only rooms; the decay
    /// path is off when unset.
    #[serde(default)]
    pub clear_delay_secs: Option<u64>,
    /// Optional occupancy seed applied at startup.
    #[serde(default)]
    pub warm_start_occupied: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Friendly name in zigbee2mqtt (e.g. "Livingroom-Motion").
    pub friendly_name: String,
    /// Boolean property in the sensor's state payload.
    #[serde(default = "default_property")]
    pub property: String,
    /// Invert the reported value (door contacts report `contact: false`
    /// when the door is open).
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_zigbee_topic() -> String {
    "zigbee2mqtt".to_string()
}

fn default_bridge_topic() -> String {
    "occupancy".to_string()
}

fn default_sensor_timeout_secs() -> u64 {
    1800
}

fn default_enter_delay_secs() -> u64 {
    30
}

fn default_property() -> String {
    "occupancy".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            rooms: Vec::new(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "virtual-occupancy-bridge".to_string(),
            username: None,
            password: None,
            zigbee_topic: default_zigbee_topic(),
            bridge_topic: default_bridge_topic(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults, then
    /// apply environment overrides.
    ///
    /// A missing file is not an error; a malformed file is logged and the
    /// bridge continues on defaults rather than refusing to start.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);

        let mut config = match Self::read_file(&path) {
            Ok(Some(config)) => {
                info!("Configuration loaded from {}", path.display());
                config
            }
            Ok(None) => {
                info!(
                    "No configuration file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
            Err(e) => {
                warn!("Ignoring malformed configuration: {}", e);
                Self::default()
            }
        };

        config.apply_env();
        config.sanitize();
        config
    }

    /// Default config location under the platform config directory.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("virtual-occupancy-bridge")
            .join("config.json")
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| BridgeError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Apply `MQTT_*` / `BRIDGE_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            self.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Ok(topic) = std::env::var("BRIDGE_ZIGBEE_TOPIC") {
            self.mqtt.zigbee_topic = topic;
        }
        if let Ok(topic) = std::env::var("BRIDGE_BASE_TOPIC") {
            self.mqtt.bridge_topic = topic;
        }
        if let Ok(interval) = std::env::var("BRIDGE_SWEEP_INTERVAL_SECS")
            && let Ok(i) = interval.parse()
        {
            self.sweep_interval_secs = i;
        }
    }

    /// Drop unusable entries instead of refusing to start: rooms without a
    /// name, sensors without a friendly name, duplicate room names.
    fn sanitize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.rooms.retain(|room| {
            if room.name.trim().is_empty() {
                warn!("Dropping room with empty name from configuration");
                return false;
            }
            if !seen.insert(room.name.clone()) {
                warn!("Dropping duplicate room '{}' from configuration", room.name);
                return false;
            }
            true
        });
        for room in &mut self.rooms {
            let name = room.name.clone();
            for list in [&mut room.trigger_sensors, &mut room.reset_sensors] {
                list.retain(|sensor| {
                    if sensor.friendly_name.trim().is_empty() {
                        warn!("Dropping sensor with empty friendly name in room '{}'", name);
                        return false;
                    }
                    true
                });
            }
        }
    }

    /// Sweep cadence as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl RoomConfig {
    /// Translate this room into the fusion engine's construction input.
    pub fn to_engine_config(&self) -> EngineConfig {
        let descriptor = |sensor: &SensorConfig, role| {
            let mut d = SensorDescriptor::new(&sensor.friendly_name, &sensor.property, role);
            if let Some(name) = &sensor.display_name {
                d = d.with_display_name(name);
            }
            d
        };
        EngineConfig {
            room: self.name.clone(),
            triggers: self
                .trigger_sensors
                .iter()
                .map(|s| descriptor(s, SensorRole::Trigger))
                .collect(),
            resets: self
                .reset_sensors
                .iter()
                .map(|s| descriptor(s, SensorRole::Reset))
                .collect(),
            sensor_timeout: Duration::from_secs(self.sensor_timeout_secs.max(1)),
            enter_delay: Duration::from_secs(self.enter_delay_secs),
            clear_delay: self.clear_delay_secs.map(Duration::from_secs),
            warm_start_occupied: self.warm_start_occupied,
        }
    }

    /// All configured sensors, triggers first.
    pub fn sensors(&self) -> impl Iterator<Item = &SensorConfig> {
        self.trigger_sensors.iter().chain(self.reset_sensors.iter())
    }
}
