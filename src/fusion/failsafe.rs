//! Fail-safe policy for total sensor loss.
//!
//! When every sensor feeding a room has gone quiet past its timeout,
//! nothing the engine believes about the room can be trusted. The policy
//! fails toward the energy-saving default: `Unknown` state, published
//! occupancy `false`. It never fails toward occupied.

use super::staleness::StaleSensorMonitor;
use super::state_machine::{OccupancyState, OccupancyStateMachine};
use log::{debug, warn};

/// Evaluates the all-sensors-stale condition after every staleness-set
/// change (and once at startup) and forces the conservative posture.
///
/// Partial staleness triggers no action: any single fresh sensor is still
/// trusted. Recovery is passive; once a sensor reports again, ordinary
/// transition rules take over on the next real observation.
pub struct FailSafeEvaluator {
    /// Set while the fail-safe posture is in force, so repeated
    /// evaluations while everything stays stale do not re-log.
    engaged: bool,
}

impl FailSafeEvaluator {
    pub fn new() -> Self {
        Self { engaged: false }
    }

    /// Whether the fail-safe posture is currently in force.
    pub fn engaged(&self) -> bool {
        self.engaged
    }

    /// Re-evaluate data quality and force the safe posture if required.
    ///
    /// Returns `true` when the posture was applied by this call.
    pub fn evaluate(
        &mut self,
        machine: &mut OccupancyStateMachine,
        monitor: &StaleSensorMonitor,
    ) -> bool {
        if !monitor.all_stale() {
            if self.engaged {
                debug!("[Fusion] Fail-safe released, a sensor is fresh again");
                self.engaged = false;
            }
            return false;
        }

        if machine.state() == OccupancyState::Paused {
            debug!("[Fusion] All sensors stale while paused, fail-safe deferred");
            return false;
        }

        if self.engaged {
            return false;
        }

        warn!(
            "[Fusion] All {} sensor(s) stale, failing safe to Unknown/unoccupied",
            monitor.tracked_count()
        );
        machine.force_failsafe();
        self.engaged = true;
        true
    }
}

impl Default for FailSafeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(1800);
    const ENTER_DELAY: Duration = Duration::from_secs(30);

    #[test]
    fn test_partial_staleness_is_no_action() {
        let start = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut monitor = StaleSensorMonitor::new(["m1", "m2"], TIMEOUT, start);
        let mut failsafe = FailSafeEvaluator::new();

        machine.on_trigger_rising(start);
        let late = start + TIMEOUT + Duration::from_secs(60);
        monitor.touch("m2", late - Duration::from_secs(1));
        monitor.sweep(late);

        assert!(!failsafe.evaluate(&mut machine, &monitor));
        assert_eq!(machine.state(), OccupancyState::Occupied);
    }

    #[test]
    fn test_total_staleness_forces_safe_posture() {
        let start = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut monitor = StaleSensorMonitor::new(["m1"], TIMEOUT, start);
        let mut failsafe = FailSafeEvaluator::new();

        machine.on_trigger_rising(start);
        monitor.sweep(start + TIMEOUT + Duration::from_secs(60));

        assert!(failsafe.evaluate(&mut machine, &monitor));
        assert_eq!(machine.state(), OccupancyState::Unknown);
        assert!(!machine.published_occupancy());

        // Re-evaluating while still fully stale applies nothing new.
        assert!(!failsafe.evaluate(&mut machine, &monitor));
    }

    #[test]
    fn test_paused_device_is_left_alone() {
        let start = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut monitor = StaleSensorMonitor::new(["m1"], TIMEOUT, start);
        let mut failsafe = FailSafeEvaluator::new();

        machine.enter_paused();
        monitor.sweep(start + TIMEOUT + Duration::from_secs(60));

        assert!(!failsafe.evaluate(&mut machine, &monitor));
        assert_eq!(machine.state(), OccupancyState::Paused);
    }

    #[test]
    fn test_release_rearms_the_policy() {
        let start = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut monitor = StaleSensorMonitor::new(["m1"], TIMEOUT, start);
        let mut failsafe = FailSafeEvaluator::new();

        let late = start + TIMEOUT + Duration::from_secs(60);
        monitor.sweep(late);
        assert!(failsafe.evaluate(&mut machine, &monitor));

        // Sensor recovers, then stales out again: the policy fires again.
        monitor.touch("m1", late);
        assert!(!failsafe.evaluate(&mut machine, &monitor));
        monitor.sweep(late + TIMEOUT + Duration::from_secs(60));
        assert!(failsafe.evaluate(&mut machine, &monitor));
    }
}
