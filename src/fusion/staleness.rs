//! Per-sensor freshness tracking.
//!
//! Each configured sensor carries its own last-update timestamp and
//! timeout; a periodic sweep (driven by the device task) recomputes
//! staleness. Notifications are edge-triggered: a sensor that stays stale
//! across many sweeps is reported exactly once, when it flips.
//!
//! Freshness is decoupled from occupancy semantics on purpose: the state
//! machine consults `is_fresh` to decide whether an edge can be trusted,
//! but this module knows nothing about occupancy.

use log::{debug, info};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One-time freshness transition for a sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessChange {
    /// No observation within the sensor's timeout.
    BecameStale(String),
    /// First observation after having been stale.
    BecameFresh(String),
}

struct SensorFreshness {
    last_updated_at: Instant,
    timeout: Duration,
    is_stale: bool,
}

/// Freshness monitor for one room's configured sensors.
///
/// Sensors are seeded fresh at construction time; a sensor that never
/// reports goes stale one sweep after its timeout elapses.
pub struct StaleSensorMonitor {
    entries: HashMap<String, SensorFreshness>,
}

impl StaleSensorMonitor {
    /// Create a monitor tracking the given sensor ids with one shared
    /// timeout, all seeded fresh as of `now`.
    pub fn new<'a>(sensor_ids: impl IntoIterator<Item = &'a str>, timeout: Duration, now: Instant) -> Self {
        let entries = sensor_ids
            .into_iter()
            .map(|id| {
                (
                    id.to_string(),
                    SensorFreshness {
                        last_updated_at: now,
                        timeout,
                        is_stale: false,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Record an observation from a sensor.
    ///
    /// Resets the sensor's freshness clock. If the sensor was stale it
    /// flips fresh and the one-time transition is returned. Untracked
    /// sensor ids are ignored.
    pub fn touch(&mut self, sensor_id: &str, now: Instant) -> Option<FreshnessChange> {
        let entry = self.entries.get_mut(sensor_id)?;
        entry.last_updated_at = now;
        if entry.is_stale {
            entry.is_stale = false;
            info!("[Fusion] Sensor '{}' became fresh again", sensor_id);
            return Some(FreshnessChange::BecameFresh(sensor_id.to_string()));
        }
        None
    }

    /// Recompute staleness for every tracked sensor.
    ///
    /// Returns the false-to-true flips only; sensors already stale are not
    /// re-reported on subsequent sweeps.
    pub fn sweep(&mut self, now: Instant) -> Vec<FreshnessChange> {
        let mut changes = Vec::new();
        for (id, entry) in &mut self.entries {
            let stale = now.saturating_duration_since(entry.last_updated_at) > entry.timeout;
            if stale && !entry.is_stale {
                entry.is_stale = true;
                info!(
                    "[Fusion] Sensor '{}' became stale (no update for {:?})",
                    id, entry.timeout
                );
                changes.push(FreshnessChange::BecameStale(id.clone()));
            } else {
                debug!("[Fusion] Sweep: sensor '{}' stale={}", id, entry.is_stale);
            }
        }
        changes
    }

    /// Whether a sensor's data is currently trustworthy.
    ///
    /// Untracked sensors report not-fresh: data we never agreed to track
    /// cannot be trusted for occupancy decisions.
    pub fn is_fresh(&self, sensor_id: &str) -> bool {
        self.entries.get(sensor_id).is_some_and(|e| !e.is_stale)
    }

    /// Whether any tracked sensor is stale.
    pub fn any_stale(&self) -> bool {
        self.entries.values().any(|e| e.is_stale)
    }

    /// Whether every tracked sensor is stale.
    ///
    /// A monitor with no tracked sensors reports `true`: a room with
    /// nothing to observe has no trustworthy data by definition.
    pub fn all_stale(&self) -> bool {
        self.entries.is_empty() || self.entries.values().all(|e| e.is_stale)
    }

    /// Number of currently stale sensors.
    pub fn stale_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_stale).count()
    }

    /// Number of tracked sensors.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1800);

    fn monitor(ids: &[&str], now: Instant) -> StaleSensorMonitor {
        StaleSensorMonitor::new(ids.iter().copied(), TIMEOUT, now)
    }

    #[test]
    fn test_sensors_start_fresh() {
        let now = Instant::now();
        let m = monitor(&["m1", "d1"], now);
        assert!(m.is_fresh("m1"));
        assert!(!m.any_stale());
        assert!(!m.all_stale());
        assert_eq!(m.stale_count(), 0);
    }

    #[test]
    fn test_sweep_marks_stale_after_timeout() {
        let start = Instant::now();
        let mut m = monitor(&["m1"], start);

        // Just inside the timeout: still fresh.
        assert!(m.sweep(start + TIMEOUT).is_empty());
        assert!(m.is_fresh("m1"));

        // Past the timeout: one stale notification.
        let changes = m.sweep(start + TIMEOUT + Duration::from_secs(60));
        assert_eq!(changes, vec![FreshnessChange::BecameStale("m1".into())]);
        assert!(!m.is_fresh("m1"));
        assert!(m.all_stale());
    }

    #[test]
    fn test_stale_is_not_renotified_every_sweep() {
        let start = Instant::now();
        let mut m = monitor(&["m1"], start);
        let late = start + TIMEOUT + Duration::from_secs(60);
        assert_eq!(m.sweep(late).len(), 1);
        assert!(m.sweep(late + Duration::from_secs(60)).is_empty());
        assert!(m.sweep(late + Duration::from_secs(120)).is_empty());
    }

    #[test]
    fn test_touch_resets_clock_and_flips_fresh() {
        let start = Instant::now();
        let mut m = monitor(&["m1"], start);
        let late = start + TIMEOUT + Duration::from_secs(60);
        m.sweep(late);
        assert!(m.all_stale());

        let change = m.touch("m1", late);
        assert_eq!(change, Some(FreshnessChange::BecameFresh("m1".into())));
        assert!(m.is_fresh("m1"));

        // Fresh touch while already fresh is silent.
        assert_eq!(m.touch("m1", late + Duration::from_secs(1)), None);

        // The clock restarted from the touch, not from construction.
        assert!(m.sweep(late + TIMEOUT).is_empty());
        assert_eq!(m.sweep(late + TIMEOUT + Duration::from_secs(1)).len(), 1);
    }

    #[test]
    fn test_untracked_sensor_is_ignored() {
        let now = Instant::now();
        let mut m = monitor(&["m1"], now);
        assert_eq!(m.touch("stray", now), None);
        assert!(!m.is_fresh("stray"));
        assert_eq!(m.tracked_count(), 1);
    }

    #[test]
    fn test_partial_staleness_aggregates() {
        let start = Instant::now();
        let mut m = monitor(&["m1", "m2"], start);
        let late = start + TIMEOUT + Duration::from_secs(60);

        // Keep m2 fresh, let m1 stale out.
        m.touch("m2", late - Duration::from_secs(1));
        let changes = m.sweep(late);
        assert_eq!(changes, vec![FreshnessChange::BecameStale("m1".into())]);
        assert!(m.any_stale());
        assert!(!m.all_stale());
        assert_eq!(m.stale_count(), 1);
    }

    #[test]
    fn test_empty_monitor_counts_as_all_stale() {
        let m = monitor(&[], Instant::now());
        assert!(m.all_stale());
        assert!(!m.any_stale());
    }
}
