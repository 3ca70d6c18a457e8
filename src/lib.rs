//! Virtual Occupancy Bridge library.
//!
//! This library fuses unreliable binary sensors (motion triggers and
//! door/contact resets, fed by zigbee2mqtt) into one stable virtual
//! occupancy signal per room, with per-sensor staleness tracking and a
//! fail-safe for total sensor loss.

pub mod capabilities;
pub mod config;
pub mod device;
pub mod error;
pub mod fusion;
pub mod input;
pub mod instance_lock;
