//! Alert endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;

use crate::{
    alerts::Alert,
    api::{
        error::ApiResult,
        state::ApiState,
        types::{AlertQuery, AlertsResponse},
    },
};

/// GET /api/alerts?severity=
///
/// Open alerts and alerts resolved within the retention window, newest first
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertsResponse> {
    let alerts = state.monitor.recent_alerts(params.severity).await;
    Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    })
}

/// POST /api/alerts/:id/resolve
pub async fn resolve_alert(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Alert>> {
    let alert = state.monitor.resolve_alert(id).await?;
    info!("alert {id} resolved via API");
    Ok(Json(alert))
}

/// POST /api/alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Alert>> {
    let alert = state.monitor.acknowledge_alert(id).await?;
    info!("alert {id} acknowledged via API");
    Ok(Json(alert))
}
