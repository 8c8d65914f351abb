//! Samples and derived metrics
//!
//! A [`Sample`] is one immutable measurement taken from a provider. The
//! classifier turns it into a [`ClassifiedSample`], and the individual
//! derived values are stored as [`MetricPoint`]s per (provider, metric).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of upstream a provider is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Blockchain JSON-RPC node
    Network,
    /// External protocol health/status endpoint
    Protocol,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Network => write!(f, "network"),
            ProviderKind::Protocol => write!(f, "protocol"),
        }
    }
}

/// Health state of a provider or sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of the metrics tracked per provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    Slot,
    BlockHeight,
    Tps,
    BlockTimeMs,
    Supply,
    LatencyMs,
    Availability,
    ErrorRate,
    AccountCount,
    ConsecutiveFailures,
}

impl MetricKey {
    pub const ALL: [MetricKey; 10] = [
        MetricKey::Slot,
        MetricKey::BlockHeight,
        MetricKey::Tps,
        MetricKey::BlockTimeMs,
        MetricKey::Supply,
        MetricKey::LatencyMs,
        MetricKey::Availability,
        MetricKey::ErrorRate,
        MetricKey::AccountCount,
        MetricKey::ConsecutiveFailures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::Slot => "slot",
            MetricKey::BlockHeight => "block_height",
            MetricKey::Tps => "tps",
            MetricKey::BlockTimeMs => "block_time_ms",
            MetricKey::Supply => "supply",
            MetricKey::LatencyMs => "latency_ms",
            MetricKey::Availability => "availability",
            MetricKey::ErrorRate => "error_rate",
            MetricKey::AccountCount => "account_count",
            MetricKey::ConsecutiveFailures => "consecutive_failures",
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown metric: {s}"))
    }
}

/// Raw chain state read from a network RPC provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub slot: u64,
    pub block_height: u64,

    /// Cumulative transaction count at `slot`
    pub transaction_count: u64,

    /// Unix time (seconds) of the block at `slot`
    pub block_time: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub supply: Option<f64>,
}

/// Raw status read from a protocol health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolReading {
    /// Status string reported by the endpoint, if it reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Reading {
    Network(NetworkReading),
    Protocol(ProtocolReading),
}

impl Reading {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Reading::Network(_) => ProviderKind::Network,
            Reading::Protocol(_) => ProviderKind::Protocol,
        }
    }
}

/// One measurement from a provider at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub provider_id: String,

    /// Logical network or protocol the provider serves
    pub target: String,

    pub timestamp: DateTime<Utc>,

    /// Round-trip time of the request that produced the sample
    pub latency_ms: f64,

    pub reading: Reading,
}

/// A sample (or a failed poll) annotated with status and derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedSample {
    pub provider_id: String,
    pub target: String,
    pub kind: ProviderKind,
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub metrics: BTreeMap<MetricKey, f64>,

    /// Raw reading; absent when the poll failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<Reading>,

    /// Failure reason when the poll failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassifiedSample {
    pub fn metric(&self, key: MetricKey) -> Option<f64> {
        self.metrics.get(&key).copied()
    }

    /// Split into one point per derived metric
    pub fn points(&self) -> impl Iterator<Item = MetricPoint> + '_ {
        self.metrics.iter().map(|(metric, value)| MetricPoint {
            provider_id: self.provider_id.clone(),
            metric: *metric,
            value: *value,
            timestamp: self.timestamp,
        })
    }
}

/// A single (provider, metric) value at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub provider_id: String,
    pub metric: MetricKey,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Anything ordered in time that can live in a metric series
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for MetricPoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for ClassifiedSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
