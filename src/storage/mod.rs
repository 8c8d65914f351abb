//! Time-series storage for samples and derived metrics
//!
//! ## Design
//!
//! - **Bounded**: every series is a ring buffer sized from the retention
//!   window and the poll interval of its provider
//! - **Lazy retention**: expired entries are evicted on the next append to the
//!   same key, no background sweep
//! - **Per-key locking**: writers to different keys never contend

pub mod memory;
pub mod series;

pub use memory::MetricsStore;
pub use series::MetricSeries;

use crate::sample::MetricKey;

/// Key of the series holding one metric of one provider
pub fn series_key(provider_id: &str, metric: MetricKey) -> String {
    format!("{provider_id}/{metric}")
}
