//! Provider registry endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::ProvidersResponse};

/// GET /api/providers
///
/// Every registered provider with its live status, latency EMA and failure streak
pub async fn list_providers(State(state): State<ApiState>) -> Json<ProvidersResponse> {
    let providers = state.monitor.registry.list(None).await;
    Json(ProvidersResponse {
        count: providers.len(),
        providers,
    })
}
