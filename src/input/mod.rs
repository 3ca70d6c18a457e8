//! Input sources feeding the occupancy devices.
//!
//! Sensor observations are a push contract: each source calls
//! `OccupancyDevice::observe` as values arrive. The MQTT source bridges
//! zigbee2mqtt; the simulation source synthesizes events for development
//! without a broker.

pub mod mqtt;
pub mod simulation;
