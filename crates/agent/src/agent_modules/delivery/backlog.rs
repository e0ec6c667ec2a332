use envflux_common::Record;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_BACKLOG_CAPACITY: usize = 10_000;

/// Records that failed delivery, oldest first. Holds at most `capacity` records;
/// overflow evicts from the front so the newest telemetry survives.
#[derive(Debug)]
pub struct Backlog {
    records: VecDeque<Record>,
    capacity: usize,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
        }
    }

    /// Appends `records` and returns how many old records were evicted.
    pub fn add_points(&mut self, records: impl IntoIterator<Item = Record>) -> usize {
        self.records.extend(records);
        let overflow = self.records.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.records.drain(..overflow);
            debug!(
                evicted = overflow,
                capacity = self.capacity,
                "Backlog full, dropped oldest records."
            );
        }
        overflow
    }

    /// Takes every queued record, leaving the backlog empty.
    pub fn drain_all(&mut self) -> Vec<Record> {
        self.records.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(n: i64) -> Record {
        Record::new("test", Utc.timestamp_opt(n, 0).unwrap()).field("n", n)
    }

    fn numbers(backlog: &Backlog) -> Vec<i64> {
        backlog.iter().map(|r| r.timestamp().timestamp()).collect()
    }

    #[test]
    fn test_within_capacity_keeps_everything() {
        let mut backlog = Backlog::new(5);
        assert_eq!(backlog.add_points((0..3).map(record)), 0);
        assert_eq!(numbers(&backlog), vec![0, 1, 2]);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut backlog = Backlog::new(4);
        backlog.add_points((0..3).map(record));
        let evicted = backlog.add_points((3..6).map(record));

        assert_eq!(evicted, 2);
        assert_eq!(numbers(&backlog), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_single_oversized_batch_keeps_newest() {
        let mut backlog = Backlog::new(3);
        backlog.add_points((0..10).map(record));

        assert_eq!(backlog.len(), 3);
        assert_eq!(numbers(&backlog), vec![7, 8, 9]);
    }

    #[test]
    fn test_bound_holds_over_many_additions() {
        let mut backlog = Backlog::new(7);
        let mut all = Vec::new();
        let mut next = 0;
        for batch_size in [1, 4, 0, 6, 2, 9, 3] {
            let batch: Vec<i64> = (next..next + batch_size).collect();
            next += batch_size;
            all.extend(batch.iter().copied());
            backlog.add_points(batch.into_iter().map(record));

            assert!(backlog.len() <= backlog.capacity());
            let expected: Vec<i64> = all.iter().rev().take(7).rev().copied().collect();
            assert_eq!(numbers(&backlog), expected);
        }
    }

    #[test]
    fn test_drain_all_empties() {
        let mut backlog = Backlog::new(10);
        backlog.add_points((0..2).map(record));
        let drained = backlog.drain_all();

        assert_eq!(drained.len(), 2);
        assert!(backlog.is_empty());
    }
}
