//! Edge-triggered sensor aggregation.
//!
//! Tracks the last known boolean per sensor and classifies each new
//! observation as a rising edge, a falling edge, or no change. Repeat
//! observations of the same value are de-duplicated here, so at-least-once
//! delivery from the host never re-fires edge-based logic downstream.

use super::{SensorDescriptor, SensorRole};
use log::{debug, warn};
use std::collections::HashMap;
use strum::Display;

/// Classification of a new observation against the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EdgeKind {
    /// Previous false/unknown, new true.
    Rising,
    /// Previous true, new false.
    Falling,
    /// Value unchanged (or first observation of `false`).
    None,
}

/// Per-room sensor value aggregator.
///
/// Owns the last-known-value map exclusively; one instance per device,
/// never shared across rooms. Sensors outside the configured set are
/// accepted and tracked but carry no role, so they never drive state
/// transitions.
pub struct SensorAggregator {
    /// Configured sensors keyed by id.
    descriptors: HashMap<String, SensorDescriptor>,
    /// Configured trigger sensor ids, in configuration order.
    trigger_ids: Vec<String>,
    /// Configured reset sensor ids, in configuration order.
    reset_ids: Vec<String>,
    /// Last known value per sensor id. `None` means never observed.
    values: HashMap<String, Option<bool>>,
}

impl SensorAggregator {
    /// Create an aggregator from ordered trigger and reset descriptor lists.
    ///
    /// Duplicate ids are dropped with a warning, keeping the first
    /// occurrence; the room keeps operating on the remaining set.
    pub fn new(triggers: Vec<SensorDescriptor>, resets: Vec<SensorDescriptor>) -> Self {
        let mut descriptors = HashMap::new();
        let mut trigger_ids = Vec::new();
        let mut reset_ids = Vec::new();

        for descriptor in triggers.into_iter().chain(resets) {
            if descriptors.contains_key(&descriptor.id) {
                warn!(
                    "[Fusion] Duplicate sensor id '{}' in configuration, keeping first",
                    descriptor.id
                );
                continue;
            }
            match descriptor.role {
                SensorRole::Trigger => trigger_ids.push(descriptor.id.clone()),
                SensorRole::Reset => reset_ids.push(descriptor.id.clone()),
            }
            descriptors.insert(descriptor.id.clone(), descriptor);
        }

        let values = descriptors.keys().map(|id| (id.clone(), None)).collect();

        Self {
            descriptors,
            trigger_ids,
            reset_ids,
            values,
        }
    }

    /// Seed last-known values without emitting edges.
    ///
    /// Used at startup (warm-start snapshot) and on resume after a pause,
    /// so the first observation afterwards is compared against the seeded
    /// baseline instead of producing a false rising edge.
    pub fn initialize_from_snapshot<'a>(
        &mut self,
        snapshot: impl IntoIterator<Item = (&'a str, bool)>,
    ) {
        for (id, value) in snapshot {
            self.values.insert(id.to_string(), Some(value));
        }
    }

    /// Record an observation and classify its edge.
    ///
    /// Always updates the stored value, regardless of edge kind.
    pub fn record_observation(&mut self, sensor_id: &str, value: bool) -> EdgeKind {
        let previous = self
            .values
            .insert(sensor_id.to_string(), Some(value))
            .flatten();

        let edge = match (previous, value) {
            (Some(true), false) => EdgeKind::Falling,
            (Some(true), true) | (Some(false), false) => EdgeKind::None,
            (Some(false), true) | (None, true) => EdgeKind::Rising,
            (None, false) => EdgeKind::None,
        };

        debug!(
            "[Fusion] Observation {}={} -> {} edge",
            sensor_id, value, edge
        );
        edge
    }

    /// Role of a configured sensor, or `None` for unknown sensors.
    pub fn role_of(&self, sensor_id: &str) -> Option<SensorRole> {
        self.descriptors.get(sensor_id).map(|d| d.role)
    }

    /// Descriptor of a configured sensor.
    pub fn descriptor(&self, sensor_id: &str) -> Option<&SensorDescriptor> {
        self.descriptors.get(sensor_id)
    }

    /// Ids of all configured sensors (triggers first, then resets).
    pub fn configured_ids(&self) -> impl Iterator<Item = &str> {
        self.trigger_ids
            .iter()
            .chain(self.reset_ids.iter())
            .map(String::as_str)
    }

    /// Number of configured trigger sensors.
    pub fn trigger_count(&self) -> usize {
        self.trigger_ids.len()
    }

    /// Last known value of a sensor. Outer `None` means never observed.
    pub fn last_known(&self, sensor_id: &str) -> Option<bool> {
        self.values.get(sensor_id).copied().flatten()
    }

    /// Whether every configured trigger sensor currently reads `true`.
    ///
    /// A never-observed trigger counts as not-true: a sensor we have no
    /// data for must not be treated as stuck-on. Rooms with zero trigger
    /// sensors report `false` (there is nothing reading true).
    pub fn all_triggers_active(&self) -> bool {
        !self.trigger_ids.is_empty()
            && self
                .trigger_ids
                .iter()
                .all(|id| self.last_known(id) == Some(true))
    }

    /// Current values of the configured sensors that have been observed.
    ///
    /// This is the snapshot `resume()` re-seeds the baseline from.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.configured_ids()
            .filter_map(|id| self.last_known(id).map(|v| (id.to_string(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(id: &str) -> SensorDescriptor {
        SensorDescriptor::new(id, "occupancy", SensorRole::Trigger)
    }

    fn door(id: &str) -> SensorDescriptor {
        SensorDescriptor::new(id, "contact", SensorRole::Reset)
    }

    #[test]
    fn test_first_true_observation_is_rising() {
        let mut agg = SensorAggregator::new(vec![motion("m1")], vec![]);
        assert_eq!(agg.record_observation("m1", true), EdgeKind::Rising);
    }

    #[test]
    fn test_first_false_observation_is_no_edge() {
        let mut agg = SensorAggregator::new(vec![motion("m1")], vec![]);
        assert_eq!(agg.record_observation("m1", false), EdgeKind::None);
    }

    #[test]
    fn test_repeat_observation_is_deduplicated() {
        let mut agg = SensorAggregator::new(vec![motion("m1")], vec![]);
        assert_eq!(agg.record_observation("m1", true), EdgeKind::Rising);
        assert_eq!(agg.record_observation("m1", true), EdgeKind::None);
        assert_eq!(agg.record_observation("m1", false), EdgeKind::Falling);
        assert_eq!(agg.record_observation("m1", false), EdgeKind::None);
    }

    #[test]
    fn test_snapshot_seed_emits_no_edges() {
        let mut agg = SensorAggregator::new(vec![motion("m1")], vec![door("d1")]);
        agg.initialize_from_snapshot([("m1", true), ("d1", false)]);
        // Same value again: no edge, the seed is the baseline.
        assert_eq!(agg.record_observation("m1", true), EdgeKind::None);
        // A real change after seeding still classifies.
        assert_eq!(agg.record_observation("m1", false), EdgeKind::Falling);
    }

    #[test]
    fn test_unknown_sensor_is_tracked_without_role() {
        let mut agg = SensorAggregator::new(vec![motion("m1")], vec![]);
        assert_eq!(agg.record_observation("mystery", true), EdgeKind::Rising);
        assert_eq!(agg.role_of("mystery"), None);
        assert_eq!(agg.last_known("mystery"), Some(true));
    }

    #[test]
    fn test_all_triggers_active() {
        let mut agg = SensorAggregator::new(vec![motion("m1"), motion("m2")], vec![door("d1")]);
        assert!(!agg.all_triggers_active());

        agg.record_observation("m1", true);
        // m2 never observed: must not count as active.
        assert!(!agg.all_triggers_active());

        agg.record_observation("m2", true);
        assert!(agg.all_triggers_active());

        agg.record_observation("m1", false);
        assert!(!agg.all_triggers_active());
    }

    #[test]
    fn test_no_triggers_never_counts_as_all_active() {
        let agg = SensorAggregator::new(vec![], vec![door("d1")]);
        assert!(!agg.all_triggers_active());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let agg = SensorAggregator::new(vec![motion("m1")], vec![door("m1")]);
        assert_eq!(agg.role_of("m1"), Some(SensorRole::Trigger));
        assert_eq!(agg.trigger_count(), 1);
    }

    #[test]
    fn test_snapshot_contains_only_observed_configured_sensors() {
        let mut agg = SensorAggregator::new(vec![motion("m1"), motion("m2")], vec![door("d1")]);
        agg.record_observation("m1", true);
        agg.record_observation("stray", true);
        let snapshot = agg.snapshot();
        assert_eq!(snapshot, vec![("m1".to_string(), true)]);
    }
}
