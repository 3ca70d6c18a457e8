//! Occupancy fusion engine.
//!
//! Fuses multiple unreliable binary sensors (motion "trigger" sensors,
//! door/contact "reset" sensors) into one stable virtual occupancy signal
//! per room. The engine is deliberately synchronous and deterministic:
//! every operation takes the current [`std::time::Instant`] as an argument
//! and returns the effects for the caller to apply, so the async device
//! layer owns all actual timers and the whole core is testable without a
//! runtime.

mod aggregator;
mod engine;
mod failsafe;
mod pause;
mod staleness;
mod state_machine;

pub use aggregator::{EdgeKind, SensorAggregator};
pub use engine::{EngineConfig, EngineEffects, OccupancyEngine};
pub use failsafe::FailSafeEvaluator;
pub use pause::PauseController;
pub use staleness::{FreshnessChange, StaleSensorMonitor};
pub use state_machine::{OccupancyState, OccupancyStateMachine, PendingTimer, TimerKind};

use strum::Display;

/// Role a sensor plays in the fusion decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SensorRole {
    /// Rising edge signals presence (motion, presence radar).
    Trigger,
    /// Rising edge signals a possible exit (door/contact opening).
    Reset,
}

/// Immutable per-sensor configuration, supplied at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    /// Unique sensor id (the zigbee2mqtt friendly name for MQTT-fed rooms).
    pub id: String,
    /// Boolean property this sensor reports (e.g. "occupancy", "contact").
    pub capability: String,
    /// Whether this sensor triggers or resets occupancy.
    pub role: SensorRole,
    /// Optional human-readable name for log output.
    pub display_name: Option<String>,
}

impl SensorDescriptor {
    /// Create a descriptor with the given id, capability and role.
    pub fn new(id: impl Into<String>, capability: impl Into<String>, role: SensorRole) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            role,
            display_name: None,
        }
    }

    /// Attach a display name used in log output.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name used in log output: the display name if set, otherwise the id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}
