//! In-memory metrics store
//!
//! One [`MetricSeries`] per key. The key map sits behind a read/write lock
//! that is only write-locked to create a series; every series has its own
//! mutex, so appends to different keys never contend and appends to the
//! same key are serialized.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Bounded**: Each series holds at most its configured capacity

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::sample::Timestamped;

use super::series::MetricSeries;

pub struct MetricsStore<T> {
    series: RwLock<HashMap<String, Arc<Mutex<MetricSeries<T>>>>>,
    retention: Duration,
    default_capacity: usize,
}

impl<T: Timestamped + Clone> MetricsStore<T> {
    pub fn new(retention: Duration, default_capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention,
            default_capacity: default_capacity.max(1),
        }
    }

    /// Create (or resize) the series for `key` with a specific capacity
    pub fn configure(&self, key: &str, capacity: usize) {
        let mut series = self.series.write().unwrap_or_else(|p| p.into_inner());
        series.insert(
            key.to_string(),
            Arc::new(Mutex::new(MetricSeries::new(capacity, Some(self.retention)))),
        );
    }

    fn series(&self, key: &str) -> Option<Arc<Mutex<MetricSeries<T>>>> {
        let series = self.series.read().unwrap_or_else(|p| p.into_inner());
        series.get(key).cloned()
    }

    fn series_or_create(&self, key: &str) -> Arc<Mutex<MetricSeries<T>>> {
        if let Some(series) = self.series(key) {
            return series;
        }
        let mut series = self.series.write().unwrap_or_else(|p| p.into_inner());
        series
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(MetricSeries::new(
                    self.default_capacity,
                    Some(self.retention),
                )))
            })
            .clone()
    }

    pub fn append(&self, key: &str, entry: T) {
        let series = self.series_or_create(key);
        let evicted = lock(&series).append(entry);
        if evicted > 0 {
            trace!("{key}: evicted {evicted} entries");
        }
    }

    /// Entries of `key` within the (inclusive) range, oldest first
    ///
    /// Each call reads the current buffer contents again.
    pub fn query(
        &self,
        key: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<T> {
        self.series(key)
            .map(|series| lock(&series).range(since, until).cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `n` newest entries of `key`, oldest first
    pub fn latest(&self, key: &str, n: usize) -> Vec<T> {
        self.series(key)
            .map(|series| lock(&series).latest(n).cloned().collect())
            .unwrap_or_default()
    }

    pub fn last(&self, key: &str) -> Option<T> {
        self.series(key)
            .and_then(|series| lock(&series).last().cloned())
    }

    pub fn len(&self, key: &str) -> usize {
        self.series(key).map_or(0, |series| lock(&series).len())
    }

    pub fn capacity(&self, key: &str) -> Option<usize> {
        self.series(key).map(|series| lock(&series).capacity())
    }

    pub fn keys(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(|p| p.into_inner());
        let mut keys: Vec<String> = series.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Entries held across all series
    pub fn total_len(&self) -> usize {
        let series = self.series.read().unwrap_or_else(|p| p.into_inner());
        series.values().map(|s| lock(s).len()).sum()
    }
}

fn lock<T>(series: &Mutex<T>) -> MutexGuard<'_, T> {
    series.lock().unwrap_or_else(|p| p.into_inner())
}
