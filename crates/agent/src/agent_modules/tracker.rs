use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Remembers the newest accepted source timestamp per entity (e.g. inverter serial)
/// so that repeated readings are not emitted twice.
///
/// Entries are never removed. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct UpdateTracker {
    last_timestamps: Arc<Mutex<HashMap<String, i64>>>,
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.last_timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_seen(&self, entity_id: &str) -> bool {
        self.guard().contains_key(entity_id)
    }

    /// Accepts `new_timestamp` iff nothing was recorded for `entity_id` yet or it is
    /// strictly newer than the recorded value. Check and store happen under one lock.
    pub fn should_update(&self, entity_id: &str, new_timestamp: i64) -> bool {
        let mut timestamps = self.guard();
        match timestamps.get_mut(entity_id) {
            Some(last) if new_timestamp > *last => {
                *last = new_timestamp;
                true
            }
            Some(_) => false,
            None => {
                timestamps.insert(entity_id.to_string(), new_timestamp);
                true
            }
        }
    }

    pub fn last_timestamp(&self, entity_id: &str) -> Option<i64> {
        self.guard().get(entity_id).copied()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reading_is_accepted() {
        let tracker = UpdateTracker::new();
        assert!(!tracker.has_seen("A"));
        assert!(tracker.should_update("A", 100));
        assert!(tracker.has_seen("A"));
        assert_eq!(tracker.last_timestamp("A"), Some(100));
    }

    #[test]
    fn test_equal_and_older_timestamps_rejected() {
        let tracker = UpdateTracker::new();
        assert!(tracker.should_update("A", 100));
        assert!(!tracker.should_update("A", 100));
        assert!(!tracker.should_update("A", 99));
        assert_eq!(tracker.last_timestamp("A"), Some(100));
        assert!(tracker.should_update("A", 101));
        assert_eq!(tracker.last_timestamp("A"), Some(101));
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = UpdateTracker::new();
        assert!(tracker.should_update("A", 500));
        assert!(tracker.should_update("B", 10));
        assert!(!tracker.should_update("B", 10));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_accepts_only_strict_running_maximum() {
        let tracker = UpdateTracker::new();
        let sequence = [5, 3, 5, 8, 7, 8, 9, 1, 12, 12];
        let mut running_max: Option<i64> = None;

        for t in sequence {
            let expected = running_max.map_or(true, |max| t > max);
            assert_eq!(tracker.should_update("inv", t), expected, "timestamp {t}");
            if expected {
                running_max = Some(t);
            }
            assert_eq!(tracker.last_timestamp("inv"), running_max);
        }
        assert_eq!(tracker.last_timestamp("inv"), Some(12));
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = UpdateTracker::new();
        let other = tracker.clone();
        assert!(tracker.should_update("A", 1));
        assert!(other.has_seen("A"));
        assert!(!other.should_update("A", 1));
    }
}
