//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};
use crate::sample::HealthStatus;

/// GET /api/health
///
/// Liveness plus a one-line summary of what is being monitored
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let monitor = &state.monitor;
    let providers = monitor.registry.list(None).await;
    let open_alerts = monitor.alerts.read().await.open_alerts().len();

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        providers: providers.len(),
        providers_down: providers
            .iter()
            .filter(|p| p.status == HealthStatus::Down)
            .count(),
        open_alerts,
        subscribers: monitor.hub.subscriber_count(),
    })
}
