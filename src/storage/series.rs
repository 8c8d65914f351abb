//! Fixed-capacity, time-ordered ring buffer

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::sample::Timestamped;

/// Ring buffer of entries for one series key
///
/// Entries are appended in timestamp order. When the buffer is full the
/// oldest entry is evicted; entries older than the retention window
/// (relative to the newest append) are evicted on append as well.
#[derive(Debug, Clone)]
pub struct MetricSeries<T> {
    entries: VecDeque<T>,
    capacity: usize,
    retention: Option<Duration>,
}

impl<T: Timestamped + Clone> MetricSeries<T> {
    pub fn new(capacity: usize, retention: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            // don't reserve the whole retention window up front
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            retention,
        }
    }

    /// Append an entry, returning how many were evicted
    pub fn append(&mut self, entry: T) -> usize {
        let mut evicted = 0;

        if let Some(retention) = self.retention
            && let Some(cutoff) = entry.timestamp().checked_sub_signed(retention)
        {
            while self
                .entries
                .front()
                .is_some_and(|oldest| oldest.timestamp() < cutoff)
            {
                self.entries.pop_front();
                evicted += 1;
            }
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }

        self.entries.push_back(entry);
        evicted
    }

    /// Entries with `since <= timestamp <= until`, oldest first
    pub fn range(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> impl Iterator<Item = &T> + '_ {
        let start = since.map_or(0, |since| {
            self.entries.partition_point(|e| e.timestamp() < since)
        });
        let end = until.map_or(self.entries.len(), |until| {
            self.entries.partition_point(|e| e.timestamp() <= until)
        });
        self.entries.range(start..end.max(start))
    }

    /// Up to `n` newest entries, oldest first
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
