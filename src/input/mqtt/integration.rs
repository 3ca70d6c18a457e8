//! MQTT integration orchestrator.
//!
//! Owns the broker client, spawns one occupancy device per configured
//! room, routes inbound sensor state to the owning devices and serves the
//! bridge's own command topics. Keeps MQTT internals out of main.rs.
//!
//! Topics:
//! - `<zigbee_topic>/<friendly_name>` (in): sensor state from zigbee2mqtt
//! - `<bridge_topic>/<room>` (out, retained): fused room state
//! - `<bridge_topic>/<room>/set` (in): pause/resume commands
//! - `<bridge_topic>/<room>/get` (in): request a state republish

use super::client::{MqttClient, MqttMessage};
use super::payload::{extract_bool_property, RoomCommand, RoomStatePayload};
use crate::capabilities::{BooleanCapability, CapabilityPublisher};
use crate::config::Config;
use crate::device::OccupancyDevice;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{info, warn};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How one inbound sensor topic maps into a room.
#[derive(Debug, Clone)]
struct SensorBinding {
    room: String,
    friendly_name: String,
    property: String,
    invert: bool,
}

/// The published-state cells of one room, readable by the publisher.
struct RoomCells {
    occupancy: Arc<BooleanCapability>,
    sensors_stale: Arc<BooleanCapability>,
}

type CellRegistry = Arc<RwLock<HashMap<String, RoomCells>>>;

/// Publishes fused room state to `<bridge_topic>/<room>` as retained JSON.
///
/// Both capability writes funnel into one combined state payload, read
/// from the room's cells (the device task updates the cells before it
/// publishes, so the payload is always self-consistent).
struct MqttRoomPublisher {
    client: AsyncClient,
    bridge_topic: String,
    cells: CellRegistry,
}

impl MqttRoomPublisher {
    async fn publish_state(&self, room: &str) -> Result<()> {
        let payload = {
            let cells = self.cells.read();
            let Some(cells) = cells.get(room) else {
                return Err(BridgeError::PublishFailed(format!(
                    "no registered cells for room '{}'",
                    room
                )));
            };
            RoomStatePayload::new(cells.occupancy.get(), cells.sensors_stale.get())
        };

        let topic = format!("{}/{}", self.bridge_topic, room);
        let json = serde_json::to_string(&payload)?;
        self.client
            .publish(&topic, QoS::AtLeastOnce, true, json.as_bytes())
            .await
            .map_err(|e| BridgeError::PublishFailed(e.to_string()))
    }
}

#[async_trait]
impl CapabilityPublisher for MqttRoomPublisher {
    async fn publish_occupancy(&self, room: &str, _occupied: bool) -> Result<()> {
        self.publish_state(room).await
    }

    async fn publish_data_quality(&self, room: &str, _stale: bool) -> Result<()> {
        self.publish_state(room).await
    }
}

/// MQTT integration orchestrator.
pub struct MqttIntegration {
    config: Config,
}

impl MqttIntegration {
    /// Create a new integration from the bridge configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start the integration on the given tracker.
    ///
    /// Connects to the broker, spawns the room devices, subscribes to all
    /// sensor and command topics, and routes messages until cancelled.
    pub fn start(self, tracker: &TaskTracker, cancel: CancellationToken) {
        let tracker_clone = tracker.clone();
        tracker.spawn(async move {
            self.run(tracker_clone, cancel).await;
        });
    }

    async fn run(self, tracker: TaskTracker, cancel: CancellationToken) {
        if self.config.rooms.is_empty() {
            info!("[MQTT] No rooms configured, skipping MQTT integration");
            return;
        }

        info!(
            "[MQTT] Connecting to {}:{}",
            self.config.mqtt.broker_host, self.config.mqtt.broker_port
        );

        let mqtt_client = MqttClient::new(&self.config.mqtt);
        let subscribe_client = mqtt_client.client();

        // Channel for MQTT messages
        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);

        // Channel to signal when connected
        let (connected_tx, connected_rx) = oneshot::channel();

        // Start MQTT event loop FIRST (so it can establish connection)
        let mqtt_loop = tokio::spawn(async move {
            mqtt_client.run(msg_tx, Some(connected_tx)).await;
        });

        // Wait for connection (with timeout)
        match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => {
                info!("[MQTT] Connection established, starting room devices");
            }
            Ok(Err(_)) => {
                warn!("[MQTT] Connection signal channel dropped");
                return;
            }
            Err(_) => {
                warn!("[MQTT] Connection timeout after 10 seconds");
                mqtt_loop.abort();
                return;
            }
        }

        // Spawn one device per room, registering its cells with the
        // publisher before the device's startup publish runs.
        let cells: CellRegistry = Arc::new(RwLock::new(HashMap::new()));
        let publisher = Arc::new(MqttRoomPublisher {
            client: subscribe_client.clone(),
            bridge_topic: self.config.mqtt.bridge_topic.clone(),
            cells: cells.clone(),
        });

        let mut devices: HashMap<String, OccupancyDevice> = HashMap::new();
        for room in &self.config.rooms {
            let (device, task) = OccupancyDevice::new(
                room.to_engine_config(),
                self.config.sweep_interval(),
                publisher.clone(),
                cancel.child_token(),
            );
            // Register the cells before the task's startup publish runs,
            // so the initial retained state reaches the broker.
            cells.write().insert(
                room.name.clone(),
                RoomCells {
                    occupancy: device.occupancy().clone(),
                    sensors_stale: device.sensors_stale().clone(),
                },
            );
            task.start(&tracker);
            devices.insert(room.name.clone(), device);
        }

        let routes = build_sensor_routes(&self.config);

        // NOW subscribe to all topics (after connection is established)
        for topic in routes.keys() {
            if let Err(e) = subscribe_client.subscribe(topic, QoS::AtMostOnce).await {
                warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e);
            }
        }
        for verb in ["set", "get"] {
            let topic = format!("{}/+/{}", self.config.mqtt.bridge_topic, verb);
            if let Err(e) = subscribe_client.subscribe(&topic, QoS::AtMostOnce).await {
                warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e);
            }
        }

        // Small delay to ensure subscriptions are processed before requesting state
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Request current state from all sensors (battery-powered ones sleep
        // and may not report for a while on their own)
        for topic in routes.keys() {
            let get_topic = format!("{}/get", topic);
            if let Err(e) = subscribe_client
                .publish(&get_topic, QoS::AtMostOnce, false, r#"{"state":""}"#)
                .await
            {
                warn!("[MQTT] Failed to request state on {}: {:?}", get_topic, e);
            }
        }

        info!(
            "[MQTT] Integration started with {} room(s), {} sensor topic(s)",
            devices.len(),
            routes.len()
        );

        // Process incoming messages until shutdown
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = msg_rx.recv() => match msg {
                    Some(msg) => {
                        self.route_message(&msg, &routes, &devices, &publisher).await;
                    }
                    None => break,
                },
            }
        }

        info!("[MQTT] Shutting down room devices");
        join_all(devices.values().map(|device| device.shutdown())).await;
        mqtt_loop.abort();
    }

    async fn route_message(
        &self,
        msg: &MqttMessage,
        routes: &HashMap<String, Vec<SensorBinding>>,
        devices: &HashMap<String, OccupancyDevice>,
        publisher: &Arc<MqttRoomPublisher>,
    ) {
        // The bridge's own command topics
        if let Some((room, verb)) = parse_bridge_topic(&self.config.mqtt.bridge_topic, &msg.topic) {
            let Some(device) = devices.get(room) else {
                warn!("[MQTT] Command for unknown room '{}'", room);
                return;
            };
            match verb {
                "set" => self.handle_room_command(device, &msg.payload).await,
                "get" => {
                    if let Err(e) = publisher.publish_state(room).await {
                        warn!("[MQTT] State republish for '{}' failed: {}", room, e);
                    }
                }
                other => warn!("[MQTT] Unknown room verb '{}'", other),
            }
            return;
        }

        // Sensor state topics
        let Some(bindings) = routes.get(&msg.topic) else {
            return;
        };
        for binding in bindings {
            let Some(raw) = extract_bool_property(&msg.payload, &binding.property) else {
                continue;
            };
            let value = raw != binding.invert;
            let Some(device) = devices.get(&binding.room) else {
                continue;
            };
            if let Err(e) = device.observe(&binding.friendly_name, value).await {
                warn!(
                    "[MQTT] Dropping observation for '{}': {}",
                    binding.friendly_name, e
                );
            }
        }
    }

    async fn handle_room_command(&self, device: &OccupancyDevice, payload: &str) {
        let Some(command) = RoomCommand::parse(payload) else {
            return;
        };
        let result = match command.pause {
            Some(true) => {
                // Pin the explicitly requested value, or hold the current one.
                let initial = command.initial.unwrap_or_else(|| device.occupancy().get());
                device.pause(initial).await
            }
            Some(false) => device.resume().await,
            None => {
                warn!("[MQTT] Room command without 'pause' field ignored");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("[MQTT] Room command for '{}' failed: {}", device.room(), e);
        }
    }
}

/// Map each sensor state topic to the rooms it feeds.
///
/// One physical sensor may appear in several rooms; every binding gets
/// the observation.
fn build_sensor_routes(config: &Config) -> HashMap<String, Vec<SensorBinding>> {
    let mut routes: HashMap<String, Vec<SensorBinding>> = HashMap::new();
    for room in &config.rooms {
        for sensor in room.sensors() {
            let topic = format!("{}/{}", config.mqtt.zigbee_topic, sensor.friendly_name);
            routes.entry(topic).or_default().push(SensorBinding {
                room: room.name.clone(),
                friendly_name: sensor.friendly_name.clone(),
                property: sensor.property.clone(),
                invert: sensor.invert,
            });
        }
    }
    routes
}

/// Split `<base>/<room>/<verb>` into room and verb.
fn parse_bridge_topic<'a>(base: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
    let (room, verb) = rest.split_once('/')?;
    if room.is_empty() || verb.is_empty() {
        return None;
    }
    Some((room, verb))
}
