//! Composition of the fusion components into one per-room engine.
//!
//! The engine owns the aggregator, the staleness monitor, the state
//! machine, the fail-safe policy and the pause controller, and is the only
//! surface the device task talks to. Every entry point is total: malformed
//! or unexpected input degrades to a logged no-op and the previously
//! committed state survives.
//!
//! Entry points return [`EngineEffects`] describing what the caller must
//! publish. Publishes are computed against the last published values, so
//! an effect is emitted only when a capability actually changed and the
//! outbound writes stay idempotent.

use super::aggregator::{EdgeKind, SensorAggregator};
use super::failsafe::FailSafeEvaluator;
use super::pause::PauseController;
use super::staleness::StaleSensorMonitor;
use super::state_machine::{OccupancyState, OccupancyStateMachine};
use super::{SensorDescriptor, SensorRole};
use log::{debug, info};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Construction input for one room's engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Room name, used in logs and outbound topics.
    pub room: String,
    /// Ordered trigger sensor descriptors.
    pub triggers: Vec<SensorDescriptor>,
    /// Ordered reset sensor descriptors.
    pub resets: Vec<SensorDescriptor>,
    /// Freshness timeout applied to every sensor in this room.
    pub sensor_timeout: Duration,
    /// Exit confirmation delay applied after a plausible exit.
    pub enter_delay: Duration,
    /// Optional decay delay; `None` disables the decay path.
    pub clear_delay: Option<Duration>,
    /// Optional warm-start occupancy seed.
    pub warm_start_occupied: Option<bool>,
}

/// Capability writes requested by an engine entry point.
///
/// `None` means the value did not change and nothing should be written.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineEffects {
    /// New occupancy value to publish.
    pub occupancy: Option<bool>,
    /// New data-quality value to publish (`true` = sensor data degraded).
    pub sensors_stale: Option<bool>,
}

impl EngineEffects {
    /// Whether anything needs publishing.
    pub fn is_empty(&self) -> bool {
        self.occupancy.is_none() && self.sensors_stale.is_none()
    }
}

/// One room's occupancy fusion engine.
pub struct OccupancyEngine {
    instance_id: Uuid,
    room: String,
    aggregator: SensorAggregator,
    monitor: StaleSensorMonitor,
    machine: OccupancyStateMachine,
    failsafe: FailSafeEvaluator,
    pause: PauseController,
    published_occupancy: Option<bool>,
    published_stale: Option<bool>,
}

impl OccupancyEngine {
    /// Build an engine from its configuration. Sensors are seeded fresh
    /// as of `now`.
    pub fn new(config: EngineConfig, now: Instant) -> Self {
        let aggregator = SensorAggregator::new(config.triggers, config.resets);
        let monitor =
            StaleSensorMonitor::new(aggregator.configured_ids(), config.sensor_timeout, now);
        let machine = OccupancyStateMachine::new(
            config.enter_delay,
            config.clear_delay,
            config.warm_start_occupied,
        );

        Self {
            instance_id: Uuid::new_v4(),
            room: config.room,
            aggregator,
            monitor,
            machine,
            failsafe: FailSafeEvaluator::new(),
            pause: PauseController::new(),
            published_occupancy: None,
            published_stale: None,
        }
    }

    /// Room name this engine serves.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Engine instance id, for log correlation.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Current occupancy state.
    pub fn state(&self) -> OccupancyState {
        self.machine.state()
    }

    /// The occupancy boolean currently published (or about to be).
    pub fn published_occupancy(&self) -> bool {
        match self.pause.override_value() {
            Some(pinned) => pinned,
            None => self.machine.published_occupancy(),
        }
    }

    /// Whether the room's sensor data is currently degraded.
    pub fn sensors_stale(&self) -> bool {
        self.monitor.tracked_count() == 0 || self.monitor.any_stale()
    }

    /// Run the startup evaluation and compute the initial publishes.
    ///
    /// Fail-safe is evaluated once here so a room constructed with no
    /// usable sensors immediately reports the safe posture. The first
    /// effects always carry both capability values.
    pub fn startup(&mut self) -> EngineEffects {
        info!(
            "[Fusion] Room '{}' engine {} starting in state {}",
            self.room, self.instance_id, self.machine.state()
        );
        self.failsafe.evaluate(&mut self.machine, &self.monitor);
        self.compute_effects()
    }

    /// Process one boolean observation pushed by the host.
    ///
    /// Always records the value and touches freshness; edges only reach
    /// the state machine when the device is not paused, the sensor is
    /// configured, and its data is fresh (the un-staling observation
    /// itself is processed as a normal edge).
    pub fn handle_observation(&mut self, sensor_id: &str, value: bool, now: Instant) -> EngineEffects {
        let edge = self.aggregator.record_observation(sensor_id, value);
        let freshness_changed = self.monitor.touch(sensor_id, now).is_some();

        if self.pause.is_paused() {
            debug!(
                "[Fusion] Room '{}': observation {}={} recorded while paused",
                self.room, sensor_id, value
            );
            return self.compute_effects();
        }

        if freshness_changed {
            self.failsafe.evaluate(&mut self.machine, &self.monitor);
        }

        if edge != EdgeKind::None {
            self.dispatch_edge(sensor_id, edge, now);
        }

        self.compute_effects()
    }

    /// Run one staleness sweep tick.
    pub fn handle_sweep(&mut self, now: Instant) -> EngineEffects {
        let changes = self.monitor.sweep(now);
        if !changes.is_empty() {
            self.failsafe.evaluate(&mut self.machine, &self.monitor);
        }
        self.compute_effects()
    }

    /// Deliver a timer wakeup. Spurious wakeups are dropped inside the
    /// state machine's due-check.
    pub fn handle_timer_due(&mut self, now: Instant) -> EngineEffects {
        self.machine.fire_due(now);
        self.compute_effects()
    }

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.machine.next_deadline()
    }

    /// Suspend automatic evaluation, pinning the published value.
    pub fn pause(&mut self, initial: bool) -> EngineEffects {
        self.pause.pause(&mut self.machine, initial);
        self.compute_effects()
    }

    /// Resume automatic evaluation.
    ///
    /// Re-reads the sensor snapshot accumulated while paused, re-seeds the
    /// aggregator baseline from it, and resolves the state: fresh trigger
    /// evidence wins, otherwise the pre-pause state is restored. The
    /// change-only effects computation makes "snapshot matches what was
    /// published" come out as zero publishes and zero transition logs.
    pub fn resume(&mut self, now: Instant) -> EngineEffects {
        if !self.pause.is_paused() {
            info!("[Fusion] Room '{}': resume ignored, not paused", self.room);
            return EngineEffects::default();
        }

        let snapshot = self.aggregator.snapshot();
        self.aggregator
            .initialize_from_snapshot(snapshot.iter().map(|(id, v)| (id.as_str(), *v)));

        let any_trigger_active = snapshot.iter().any(|(id, value)| {
            *value
                && self.aggregator.role_of(id) == Some(SensorRole::Trigger)
                && self.monitor.is_fresh(id)
        });

        self.pause.resume(&mut self.machine, any_trigger_active, now);
        // Sensors may have staled out wholesale during the pause window.
        self.failsafe.evaluate(&mut self.machine, &self.monitor);
        self.compute_effects()
    }

    /// Tear the engine down: abandon all countdowns.
    ///
    /// The sweep stops with the owning device task.
    pub fn shutdown(&mut self) {
        self.machine.cancel_all();
        info!(
            "[Fusion] Room '{}' engine {} shut down",
            self.room, self.instance_id
        );
    }

    fn dispatch_edge(&mut self, sensor_id: &str, edge: EdgeKind, now: Instant) {
        let Some(role) = self.aggregator.role_of(sensor_id) else {
            debug!(
                "[Fusion] Room '{}': {} edge from unconfigured sensor '{}' ignored",
                self.room, edge, sensor_id
            );
            return;
        };

        if !self.monitor.is_fresh(sensor_id) {
            debug!(
                "[Fusion] Room '{}': {} edge from stale sensor '{}' ignored",
                self.room, edge, sensor_id
            );
            return;
        }

        match (role, edge) {
            (SensorRole::Trigger, EdgeKind::Rising) => self.machine.on_trigger_rising(now),
            (SensorRole::Trigger, EdgeKind::Falling) => self.machine.on_trigger_falling(now),
            (SensorRole::Reset, EdgeKind::Rising) => {
                let all_active = self.aggregator.all_triggers_active();
                self.machine.on_reset_rising(all_active, now);
            }
            (SensorRole::Reset, EdgeKind::Falling) => {
                debug!(
                    "[Fusion] Room '{}': reset falling edge from '{}' carries no meaning",
                    self.room, sensor_id
                );
            }
            (_, EdgeKind::None) => {}
        }
    }

    /// Diff the computed capability values against what was last published.
    fn compute_effects(&mut self) -> EngineEffects {
        let occupancy = self.published_occupancy();
        let stale = self.sensors_stale();

        let mut effects = EngineEffects::default();
        if self.published_occupancy != Some(occupancy) {
            self.published_occupancy = Some(occupancy);
            info!(
                "[Fusion] Room '{}': occupancy -> {} (state {})",
                self.room, occupancy, self.machine.state()
            );
            effects.occupancy = Some(occupancy);
        }
        if self.published_stale != Some(stale) {
            self.published_stale = Some(stale);
            info!("[Fusion] Room '{}': sensors_stale -> {}", self.room, stale);
            effects.sensors_stale = Some(stale);
        }
        effects
    }
}
