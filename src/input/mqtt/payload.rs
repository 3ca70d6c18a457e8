//! Wire payloads exchanged with the broker.
//!
//! Inbound: zigbee2mqtt state JSON, from which one configured boolean
//! property is extracted per sensor. Different vendors encode booleans
//! differently ("ON"/"OFF" strings, real booleans), so extraction is
//! tolerant. Outbound: the bridge's room state payload and the command
//! payload accepted on the `/set` topic.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Room state published to `<bridge_topic>/<room>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatePayload {
    /// The fused occupancy value.
    pub occupancy: bool,
    /// Data quality: `true` when at least one sensor has gone quiet past
    /// its timeout (or the room has no usable sensors at all).
    pub sensors_stale: bool,
    /// When this payload was produced.
    pub last_changed: DateTime<Utc>,
}

impl RoomStatePayload {
    pub fn new(occupancy: bool, sensors_stale: bool) -> Self {
        Self {
            occupancy,
            sensors_stale,
            last_changed: Utc::now(),
        }
    }
}

/// Command accepted on `<bridge_topic>/<room>/set`.
///
/// `{"pause": true}` suspends evaluation pinning the current value,
/// `{"pause": true, "initial": false}` pins an explicit value, and
/// `{"pause": false}` resumes.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomCommand {
    pub pause: Option<bool>,
    #[serde(default)]
    pub initial: Option<bool>,
}

impl RoomCommand {
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(command) => Some(command),
            Err(e) => {
                warn!("[MQTT] Ignoring malformed room command '{}': {}", payload, e);
                None
            }
        }
    }
}

/// Extract one boolean property from a zigbee2mqtt state payload.
///
/// Returns `None` (a no-observation) when the payload is not JSON, the
/// property is absent, or its value has no boolean reading; the sensor
/// will surface through staleness if this keeps happening.
pub fn extract_bool_property(payload: &str, property: &str) -> Option<bool> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("[MQTT] Ignoring non-JSON sensor payload: {}", e);
            return None;
        }
    };

    match value.get(property) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "open" | "detected" => Some(true),
            "off" | "false" | "closed" | "clear" => Some(false),
            other => {
                warn!(
                    "[MQTT] Property '{}' has no boolean reading: '{}'",
                    property, other
                );
                None
            }
        },
        Some(other) => {
            warn!(
                "[MQTT] Property '{}' is not a boolean: {}",
                property, other
            );
            None
        }
        None => None,
    }
}
