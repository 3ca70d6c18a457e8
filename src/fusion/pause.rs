//! Manual pause/resume override.
//!
//! While paused, observations are still recorded (the aggregator baseline
//! and staleness clocks keep moving) but nothing is acted upon, and the
//! published occupancy is pinned to the value the caller asked for. Resume
//! re-reads the sensor snapshot to close the race where sensors changed
//! during the pause window.

use super::state_machine::{OccupancyState, OccupancyStateMachine};
use log::{info, warn};
use std::time::Instant;

/// Pause bookkeeping layered over the state machine.
pub struct PauseController {
    /// Occupancy value pinned while paused.
    override_value: Option<bool>,
    /// State captured at pause time, restored on resume when the sensor
    /// snapshot shows no evidence of presence.
    state_before_pause: Option<OccupancyState>,
}

impl PauseController {
    pub fn new() -> Self {
        Self {
            override_value: None,
            state_before_pause: None,
        }
    }

    /// Whether evaluation is currently suspended.
    pub fn is_paused(&self) -> bool {
        self.override_value.is_some()
    }

    /// The occupancy value pinned while paused, if any.
    pub fn override_value(&self) -> Option<bool> {
        self.override_value
    }

    /// Suspend automatic evaluation and pin the published value.
    ///
    /// A second `pause` while already paused just re-pins the value; the
    /// originally captured state stays what it was.
    pub fn pause(&mut self, machine: &mut OccupancyStateMachine, initial: bool) {
        if self.is_paused() {
            info!("[Fusion] Already paused, re-pinning published value to {}", initial);
            self.override_value = Some(initial);
            return;
        }
        self.state_before_pause = Some(machine.state());
        self.override_value = Some(initial);
        machine.enter_paused();
        info!("[Fusion] Paused, publishing {} while suspended", initial);
    }

    /// Resume automatic evaluation.
    ///
    /// `any_trigger_active` is the freshly re-read trigger snapshot: when
    /// any trigger still reads true, presence wins and the room resumes
    /// `Occupied`; otherwise the pre-pause state is restored. Returns
    /// `false` (a logged no-op) when not paused.
    pub fn resume(
        &mut self,
        machine: &mut OccupancyStateMachine,
        any_trigger_active: bool,
        now: Instant,
    ) -> bool {
        if !self.is_paused() {
            info!("[Fusion] Resume ignored, not paused");
            return false;
        }

        let captured = self.state_before_pause.take();
        self.override_value = None;

        if any_trigger_active {
            machine.restore(OccupancyState::Occupied, now);
            return true;
        }

        match captured {
            Some(state) => machine.restore(state, now),
            None => {
                // Captured state lost: fall back to the stable value.
                warn!("[Fusion] No captured pre-pause state, restoring from last stable value");
                let state = if machine.last_stable_occupancy() {
                    OccupancyState::Occupied
                } else {
                    OccupancyState::Unoccupied
                };
                machine.restore(state, now);
            }
        }
        true
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ENTER_DELAY: Duration = Duration::from_secs(30);

    #[test]
    fn test_pause_pins_value_and_suspends() {
        let now = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut pause = PauseController::new();

        machine.on_trigger_rising(now);
        pause.pause(&mut machine, true);

        assert!(pause.is_paused());
        assert_eq!(pause.override_value(), Some(true));
        assert_eq!(machine.state(), OccupancyState::Paused);
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_resume_restores_pre_pause_state() {
        let now = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut pause = PauseController::new();

        machine.on_trigger_rising(now);
        pause.pause(&mut machine, true);
        assert!(pause.resume(&mut machine, false, now));
        // Snapshot shows no active trigger, but the captured state was
        // Occupied, so the room resumes occupied.
        assert_eq!(machine.state(), OccupancyState::Occupied);
        assert!(machine.published_occupancy());
    }

    #[test]
    fn test_resume_with_active_trigger_resumes_occupied() {
        let now = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut pause = PauseController::new();

        pause.pause(&mut machine, false);
        assert!(pause.resume(&mut machine, true, now));
        assert_eq!(machine.state(), OccupancyState::Occupied);
    }

    #[test]
    fn test_resume_while_not_paused_is_noop() {
        let now = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut pause = PauseController::new();

        assert!(!pause.resume(&mut machine, false, now));
        assert_eq!(machine.state(), OccupancyState::Unoccupied);
    }

    #[test]
    fn test_repause_repins_value() {
        let now = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut pause = PauseController::new();

        machine.on_trigger_rising(now);
        pause.pause(&mut machine, true);
        pause.pause(&mut machine, false);
        assert_eq!(pause.override_value(), Some(false));

        // The original captured state survives the re-pin.
        assert!(pause.resume(&mut machine, false, now));
        assert_eq!(machine.state(), OccupancyState::Occupied);
    }

    #[test]
    fn test_resume_from_unknown_rearms_confirmation() {
        let now = Instant::now();
        let mut machine = OccupancyStateMachine::new(ENTER_DELAY, None, None);
        let mut pause = PauseController::new();

        machine.on_trigger_rising(now);
        machine.on_reset_rising(false, now);
        assert_eq!(machine.state(), OccupancyState::Unknown);

        pause.pause(&mut machine, true);
        assert!(pause.resume(&mut machine, false, now + Duration::from_secs(5)));
        assert_eq!(machine.state(), OccupancyState::Unknown);
        assert_eq!(
            machine.next_deadline(),
            Some(now + Duration::from_secs(5) + ENTER_DELAY)
        );
    }
}
