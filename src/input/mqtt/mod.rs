//! MQTT input source for zigbee2mqtt sensor integration.
//!
//! Subscribes to the state topics of every configured sensor, routes the
//! extracted boolean observations into the owning room's device, and
//! publishes the fused room state back to the broker.

mod client;
mod integration;
mod payload;

pub use client::{MqttClient, MqttMessage};
pub use integration::MqttIntegration;
pub use payload::{extract_bool_property, RoomCommand, RoomStatePayload};
