//! Hysteresis state machine with entry/exit confirmation timers.
//!
//! The machine never trusts a single event to mean "room empty": a
//! plausible exit first moves the room to `Unknown` and starts (or defers)
//! a confirmation timer, and any fresh motion cancels the countdown. The
//! published value freezes at the last confirmed state while the room is
//! unresolved, so downstream automations never see a flap.
//!
//! Timers are modelled as deadlines owned by the machine; the device task
//! sleeps until [`OccupancyStateMachine::next_deadline`] and then calls
//! [`OccupancyStateMachine::fire_due`]. A deadline superseded or cancelled
//! before delivery simply no longer exists when the wakeup arrives, and
//! the due-check drops the spurious wakeup.

use log::{debug, info, warn};
use std::time::{Duration, Instant};
use strum::Display;

/// Occupancy state of one room. Exactly one value per device at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum OccupancyState {
    /// Presence confirmed by a fresh trigger rising edge.
    Occupied,
    /// Absence confirmed (timer expiry or fail-safe default).
    Unoccupied,
    /// A plausible exit is being confirmed, or data cannot be trusted.
    Unknown,
    /// Automatic evaluation manually suspended.
    Paused,
}

/// Kind of confirmation timer. At most one of each kind is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TimerKind {
    /// Exit confirmation: fires one confirmation delay after a plausible
    /// exit.
    Enter,
    /// Decay path for trigger-only rooms: fires one decay delay after the
    /// last trigger activity.
    Clear,
}

/// An armed confirmation timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub kind: TimerKind,
    pub target: OccupancyState,
    pub fire_at: Instant,
}

/// The hysteresis core for one room.
pub struct OccupancyStateMachine {
    state: OccupancyState,
    /// Last confirmed (non-`Unknown`, non-`Paused`) occupancy.
    last_stable_occupancy: bool,
    /// Armed when a reset fired while every trigger still read true.
    waiting_for_falling_edge: bool,
    enter_timer: Option<PendingTimer>,
    clear_timer: Option<PendingTimer>,
    enter_delay: Duration,
    /// Decay delay; `None` disables the decay path for this room.
    clear_delay: Option<Duration>,
}

impl OccupancyStateMachine {
    /// Create a machine in `Unoccupied`, or seeded from a warm-start value.
    pub fn new(
        enter_delay: Duration,
        clear_delay: Option<Duration>,
        warm_start_occupied: Option<bool>,
    ) -> Self {
        let occupied = warm_start_occupied.unwrap_or(false);
        Self {
            state: if occupied {
                OccupancyState::Occupied
            } else {
                OccupancyState::Unoccupied
            },
            last_stable_occupancy: occupied,
            waiting_for_falling_edge: false,
            enter_timer: None,
            clear_timer: None,
            enter_delay,
            clear_delay,
        }
    }

    /// Current state.
    pub fn state(&self) -> OccupancyState {
        self.state
    }

    /// Last confirmed occupancy value.
    pub fn last_stable_occupancy(&self) -> bool {
        self.last_stable_occupancy
    }

    /// Whether the machine is waiting for a trigger falling edge before
    /// starting the exit confirmation.
    pub fn waiting_for_falling_edge(&self) -> bool {
        self.waiting_for_falling_edge
    }

    /// The occupancy boolean to publish for the current state.
    ///
    /// While unresolved (`Unknown`/`Paused`) the last confirmed value is
    /// held rather than flapping the published capability.
    pub fn published_occupancy(&self) -> bool {
        match self.state {
            OccupancyState::Occupied => true,
            OccupancyState::Unoccupied => false,
            OccupancyState::Unknown | OccupancyState::Paused => self.last_stable_occupancy,
        }
    }

    /// A fresh trigger sensor rose: presence detected.
    ///
    /// Cancels any pending confirmation, clears the falling-edge wait and
    /// commits `Occupied`. Re-arms the decay timer where configured, so a
    /// lived-in room keeps deferring its decay.
    pub fn on_trigger_rising(&mut self, now: Instant) {
        if self.state == OccupancyState::Paused {
            warn!("[Fusion] Trigger rising reached machine while paused, ignoring");
            return;
        }
        if self.enter_timer.take().is_some() {
            debug!("[Fusion] Enter timer cancelled by trigger rising");
        }
        self.waiting_for_falling_edge = false;
        if self.state != OccupancyState::Occupied {
            info!("[Fusion] {} -> Occupied (trigger rising)", self.state);
        }
        self.state = OccupancyState::Occupied;
        self.last_stable_occupancy = true;
        self.arm_clear(now);
    }

    /// A fresh reset sensor rose: a possible exit.
    ///
    /// `all_triggers_active` is the OR-combined read of every configured
    /// trigger sensor. When all still read true the exit is not trusted
    /// (a stuck motion sensor must not count as "about to leave") and the
    /// machine waits for a falling edge instead of starting the timer.
    pub fn on_reset_rising(&mut self, all_triggers_active: bool, now: Instant) {
        match self.state {
            OccupancyState::Occupied | OccupancyState::Unknown => {}
            other => {
                debug!("[Fusion] Reset rising ignored in state {}", other);
                return;
            }
        }

        if all_triggers_active {
            info!(
                "[Fusion] {} -> Unknown (reset rising, all triggers still active: waiting for falling edge)",
                self.state
            );
            self.state = OccupancyState::Unknown;
            self.waiting_for_falling_edge = true;
        } else {
            info!(
                "[Fusion] {} -> Unknown (reset rising, arming exit confirmation of {:?})",
                self.state, self.enter_delay
            );
            self.state = OccupancyState::Unknown;
            self.arm_enter(now);
        }
    }

    /// A fresh trigger sensor fell.
    ///
    /// Only meaningful while the falling-edge wait is armed: the stuck
    /// trigger released, so the exit confirmation can finally start.
    pub fn on_trigger_falling(&mut self, now: Instant) {
        if !self.waiting_for_falling_edge {
            return;
        }
        self.waiting_for_falling_edge = false;
        info!(
            "[Fusion] Trigger falling ends wait, arming exit confirmation of {:?}",
            self.enter_delay
        );
        self.arm_enter(now);
    }

    /// Fire every timer whose deadline has passed.
    ///
    /// Returns `true` if a transition occurred. A wakeup with no due timer
    /// (logically cancelled before delivery) is dropped with a log line.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        if self.state == OccupancyState::Paused {
            warn!("[Fusion] Timer wakeup while paused, dropping");
            return false;
        }

        let enter_due = self.enter_timer.is_some_and(|t| t.fire_at <= now);
        let clear_due = self.clear_timer.is_some_and(|t| t.fire_at <= now);

        if !enter_due && !clear_due {
            debug!("[Fusion] Timer wakeup with nothing due, dropping");
            return false;
        }

        if enter_due {
            self.enter_timer = None;
            info!("[Fusion] {} -> Unoccupied (exit confirmed)", self.state);
            self.commit_unoccupied();
            return true;
        }

        // Clear decay: only fires when the room has not already resolved.
        self.clear_timer = None;
        if self.state == OccupancyState::Unoccupied {
            debug!("[Fusion] Clear timer fired while already Unoccupied, dropping");
            return false;
        }
        info!("[Fusion] {} -> Unoccupied (decayed while idle)", self.state);
        self.commit_unoccupied();
        true
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.enter_timer, self.clear_timer) {
            (Some(a), Some(b)) => Some(a.fire_at.min(b.fire_at)),
            (Some(a), None) => Some(a.fire_at),
            (None, Some(b)) => Some(b.fire_at),
            (None, None) => None,
        }
    }

    /// Cancel both timers and the falling-edge wait.
    pub fn cancel_all(&mut self) {
        if self.enter_timer.take().is_some() {
            debug!("[Fusion] Enter timer cancelled");
        }
        if self.clear_timer.take().is_some() {
            debug!("[Fusion] Clear timer cancelled");
        }
        self.waiting_for_falling_edge = false;
    }

    /// Force the fail-safe posture: `Unknown` with the energy-saving
    /// default as the stable value, all countdowns abandoned.
    pub fn force_failsafe(&mut self) {
        self.cancel_all();
        if self.state != OccupancyState::Unknown {
            info!("[Fusion] {} -> Unknown (fail-safe)", self.state);
        }
        self.state = OccupancyState::Unknown;
        self.last_stable_occupancy = false;
    }

    /// Enter the paused state, abandoning all countdowns.
    pub fn enter_paused(&mut self) {
        self.cancel_all();
        info!("[Fusion] {} -> Paused", self.state);
        self.state = OccupancyState::Paused;
    }

    /// Restore a previously captured state on resume.
    ///
    /// Timers died with `pause()`; when the restored state is `Unknown`
    /// the exit confirmation is re-armed from now so the room cannot hang
    /// unresolved forever.
    pub fn restore(&mut self, state: OccupancyState, now: Instant) {
        debug_assert_ne!(state, OccupancyState::Paused);
        info!("[Fusion] Paused -> {} (resume)", state);
        self.state = state;
        match state {
            OccupancyState::Unknown => self.arm_enter(now),
            OccupancyState::Occupied => {
                self.last_stable_occupancy = true;
                self.arm_clear(now);
            }
            OccupancyState::Unoccupied => self.last_stable_occupancy = false,
            OccupancyState::Paused => {}
        }
    }

    fn commit_unoccupied(&mut self) {
        self.cancel_all();
        self.state = OccupancyState::Unoccupied;
        self.last_stable_occupancy = false;
    }

    /// Arm (or supersede) the exit confirmation timer.
    fn arm_enter(&mut self, now: Instant) {
        self.enter_timer = Some(PendingTimer {
            kind: TimerKind::Enter,
            target: OccupancyState::Unoccupied,
            fire_at: now + self.enter_delay,
        });
    }

    /// Arm (or supersede) the decay timer where the room opted in.
    fn arm_clear(&mut self, now: Instant) {
        if let Some(delay) = self.clear_delay {
            self.clear_timer = Some(PendingTimer {
                kind: TimerKind::Clear,
                target: OccupancyState::Unoccupied,
                fire_at: now + delay,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTER_DELAY: Duration = Duration::from_secs(30);
    const CLEAR_DELAY: Duration = Duration::from_secs(600);

    fn machine() -> OccupancyStateMachine {
        OccupancyStateMachine::new(ENTER_DELAY, None, None)
    }

    #[test]
    fn test_initial_state_unoccupied() {
        let m = machine();
        assert_eq!(m.state(), OccupancyState::Unoccupied);
        assert!(!m.published_occupancy());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_warm_start_occupied() {
        let m = OccupancyStateMachine::new(ENTER_DELAY, None, Some(true));
        assert_eq!(m.state(), OccupancyState::Occupied);
        assert!(m.published_occupancy());
        assert!(m.last_stable_occupancy());
    }

    #[test]
    fn test_trigger_rising_occupies() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        assert_eq!(m.state(), OccupancyState::Occupied);
        assert!(m.published_occupancy());
    }

    #[test]
    fn test_reset_with_inactive_trigger_arms_enter_timer() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.on_reset_rising(false, now);
        assert_eq!(m.state(), OccupancyState::Unknown);
        assert!(!m.waiting_for_falling_edge());
        assert_eq!(m.next_deadline(), Some(now + ENTER_DELAY));
        // Published value freezes at the last stable value while unknown.
        assert!(m.published_occupancy());
    }

    #[test]
    fn test_enter_timer_expiry_confirms_unoccupied() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.on_reset_rising(false, now);
        assert!(m.fire_due(now + ENTER_DELAY));
        assert_eq!(m.state(), OccupancyState::Unoccupied);
        assert!(!m.published_occupancy());
        assert!(!m.last_stable_occupancy());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_trigger_rising_cancels_pending_confirmation() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.on_reset_rising(false, now);
        m.on_trigger_rising(now + Duration::from_secs(5));
        assert_eq!(m.state(), OccupancyState::Occupied);
        assert_eq!(m.next_deadline(), None);
        // The superseded deadline must not fire.
        assert!(!m.fire_due(now + ENTER_DELAY));
        assert_eq!(m.state(), OccupancyState::Occupied);
    }

    #[test]
    fn test_reset_with_all_triggers_active_waits_for_falling_edge() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.on_reset_rising(true, now);
        assert_eq!(m.state(), OccupancyState::Unknown);
        assert!(m.waiting_for_falling_edge());
        // No countdown yet: a stuck trigger must not be trusted as "leaving".
        assert_eq!(m.next_deadline(), None);

        m.on_trigger_falling(now + Duration::from_secs(2));
        assert!(!m.waiting_for_falling_edge());
        assert_eq!(m.state(), OccupancyState::Unknown);
        assert_eq!(m.next_deadline(), Some(now + Duration::from_secs(2) + ENTER_DELAY));
    }

    #[test]
    fn test_trigger_falling_without_wait_is_ignored() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.on_trigger_falling(now);
        assert_eq!(m.state(), OccupancyState::Occupied);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_reset_rising_ignored_while_unoccupied() {
        let now = Instant::now();
        let mut m = machine();
        m.on_reset_rising(false, now);
        assert_eq!(m.state(), OccupancyState::Unoccupied);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_clear_timer_decays_occupied_room() {
        let now = Instant::now();
        let mut m = OccupancyStateMachine::new(ENTER_DELAY, Some(CLEAR_DELAY), None);
        m.on_trigger_rising(now);
        assert_eq!(m.next_deadline(), Some(now + CLEAR_DELAY));

        // Motion keeps deferring the decay.
        m.on_trigger_rising(now + Duration::from_secs(60));
        assert_eq!(m.next_deadline(), Some(now + Duration::from_secs(60) + CLEAR_DELAY));

        assert!(m.fire_due(now + Duration::from_secs(60) + CLEAR_DELAY));
        assert_eq!(m.state(), OccupancyState::Unoccupied);
        assert!(!m.published_occupancy());
    }

    #[test]
    fn test_enter_timer_wins_over_clear_timer() {
        let now = Instant::now();
        let mut m = OccupancyStateMachine::new(ENTER_DELAY, Some(CLEAR_DELAY), None);
        m.on_trigger_rising(now);
        m.on_reset_rising(false, now);
        // Both armed; the earlier enter deadline resolves the room and the
        // decay dies with it.
        assert_eq!(m.next_deadline(), Some(now + ENTER_DELAY));
        assert!(m.fire_due(now + ENTER_DELAY));
        assert_eq!(m.state(), OccupancyState::Unoccupied);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_failsafe_forces_unknown_with_false_default() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.force_failsafe();
        assert_eq!(m.state(), OccupancyState::Unknown);
        assert!(!m.last_stable_occupancy());
        assert!(!m.published_occupancy());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_pause_cancels_everything() {
        let now = Instant::now();
        let mut m = OccupancyStateMachine::new(ENTER_DELAY, Some(CLEAR_DELAY), None);
        m.on_trigger_rising(now);
        m.on_reset_rising(false, now);
        m.enter_paused();
        assert_eq!(m.state(), OccupancyState::Paused);
        assert_eq!(m.next_deadline(), None);
        assert!(!m.fire_due(now + ENTER_DELAY));
        assert_eq!(m.state(), OccupancyState::Paused);
    }

    #[test]
    fn test_restore_unknown_rearms_confirmation() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        m.on_reset_rising(false, now);
        m.enter_paused();
        m.restore(OccupancyState::Unknown, now + Duration::from_secs(10));
        assert_eq!(m.state(), OccupancyState::Unknown);
        assert_eq!(
            m.next_deadline(),
            Some(now + Duration::from_secs(10) + ENTER_DELAY)
        );
    }

    #[test]
    fn test_stale_wakeup_with_nothing_due_is_dropped() {
        let now = Instant::now();
        let mut m = machine();
        m.on_trigger_rising(now);
        assert!(!m.fire_due(now + Duration::from_secs(3600)));
        assert_eq!(m.state(), OccupancyState::Occupied);
    }
}
