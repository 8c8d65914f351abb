pub mod actors;
pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod monitor;
pub mod monitors;
pub mod notify;
pub mod registry;
pub mod sample;
pub mod storage;
pub mod util;

pub use error::{MonitorError, MonitorResult};
pub use monitor::{Monitor, MonitorHandles};
pub use sample::{ClassifiedSample, HealthStatus, MetricKey, ProviderKind, Sample};
