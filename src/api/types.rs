//! API request and response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, Severity};
use crate::registry::Provider;
use crate::sample::{ClassifiedSample, MetricKey, MetricPoint};

// ============================================================================
// Query Parameters
// ============================================================================

/// GET /api/metrics/network
#[derive(Debug, Default, Deserialize)]
pub struct NetworkQuery {
    pub provider: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    /// Newest samples per provider when no range is given
    pub limit: Option<usize>,
}

/// GET /api/metrics/protocols
#[derive(Debug, Default, Deserialize)]
pub struct ProtocolQuery {
    /// Protocol target (or provider id)
    pub protocol: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// GET /api/metrics/series
#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub provider: String,
    pub metric: MetricKey,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// GET /api/alerts
#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub severity: Option<Severity>,
}

/// WS /api/stream
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma separated channel names, all channels if unset
    pub channels: Option<String>,
}

// ============================================================================
// API Response Types
// ============================================================================

/// Response for GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub providers: usize,
    pub providers_down: usize,
    pub open_alerts: usize,
    pub subscribers: usize,
}

/// Response for GET /api/metrics/network and /api/metrics/protocols
///
/// Samples may be stale; `providers` carries the live status next to them.
#[derive(Debug, Clone, Serialize)]
pub struct SamplesResponse {
    pub count: usize,
    pub samples: Vec<ClassifiedSample>,
    pub providers: Vec<Provider>,
}

/// Response for GET /api/metrics/series
#[derive(Debug, Clone, Serialize)]
pub struct SeriesResponse {
    pub provider_id: String,
    pub metric: MetricKey,
    pub count: usize,
    pub points: Vec<MetricPoint>,
}

/// Response for GET /api/alerts
#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub count: usize,
    pub alerts: Vec<Alert>,
}

/// Response for GET /api/providers
#[derive(Debug, Clone, Serialize)]
pub struct ProvidersResponse {
    pub count: usize,
    pub providers: Vec<Provider>,
}
