//! Published capability state and the outbound publish seam.
//!
//! Each room exposes two boolean capabilities: occupancy and data quality
//! ("sensors stale"). The cells here hold the last published value so any
//! part of the bridge can read it (the MQTT `/get` handler, status
//! logging, tests), and the [`CapabilityPublisher`] trait is the seam the
//! device task pushes actual writes through.

mod boolean_capability;

pub use boolean_capability::BooleanCapability;

use crate::error::Result;
use async_trait::async_trait;
use log::info;

/// Outbound boundary for capability writes.
///
/// Implementations must be idempotent-friendly: the device task only calls
/// them when a value actually changed, and a failed write is logged and
/// naturally retried on the next real transition.
#[async_trait]
pub trait CapabilityPublisher: Send + Sync {
    /// Publish the room's occupancy boolean.
    async fn publish_occupancy(&self, room: &str, occupied: bool) -> Result<()>;

    /// Publish the room's data-quality boolean (`true` = degraded).
    async fn publish_data_quality(&self, room: &str, stale: bool) -> Result<()>;
}

/// Publisher that only writes to the log.
///
/// Used in simulation mode (no broker) and in tests.
pub struct LogCapabilityPublisher;

#[async_trait]
impl CapabilityPublisher for LogCapabilityPublisher {
    async fn publish_occupancy(&self, room: &str, occupied: bool) -> Result<()> {
        info!("[Capability] {}: occupancy = {}", room, occupied);
        Ok(())
    }

    async fn publish_data_quality(&self, room: &str, stale: bool) -> Result<()> {
        info!("[Capability] {}: sensors_stale = {}", room, stale);
        Ok(())
    }
}
