//! Per-room virtual occupancy devices.
//!
//! Each configured room runs as one tokio task owning one fusion engine,
//! which makes the engine's single-logical-actor requirement concrete:
//! commands, sweep ticks and timer wakeups are all serviced by the same
//! task, strictly in arrival order, with no interleaving.

mod occupancy_device;

pub use occupancy_device::{DeviceCommand, DeviceTask, OccupancyDevice};
