//! Metric endpoints

use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::{NetworkQuery, ProtocolQuery, SamplesResponse, SeriesQuery, SeriesResponse},
    },
    monitor::SampleQuery,
    sample::ProviderKind,
};

fn check_range(
    since: Option<chrono::DateTime<chrono::Utc>>,
    until: Option<chrono::DateTime<chrono::Utc>>,
) -> ApiResult<()> {
    if let (Some(since), Some(until)) = (since, until)
        && since > until
    {
        return Err(ApiError::InvalidRequest(
            "`since` must not be after `until`".to_string(),
        ));
    }
    Ok(())
}

/// GET /api/metrics/network?provider=&since=&until=&limit=
///
/// Recent classified samples of network providers plus their live status
pub async fn network_metrics(
    State(state): State<ApiState>,
    Query(params): Query<NetworkQuery>,
) -> ApiResult<Json<SamplesResponse>> {
    check_range(params.since, params.until)?;

    if let Some(provider) = &params.provider
        && state.monitor.registry.get(provider).await.is_none()
    {
        return Err(ApiError::NotFound(format!("unknown provider: {provider}")));
    }

    let query = SampleQuery {
        kind: Some(ProviderKind::Network),
        provider: params.provider.clone(),
        since: params.since,
        until: params.until,
        limit: params.limit,
        ..SampleQuery::default()
    };
    let samples = state.monitor.samples(&query).await;

    let providers = state
        .monitor
        .registry
        .list(Some(ProviderKind::Network))
        .await
        .into_iter()
        .filter(|p| params.provider.as_deref().is_none_or(|id| p.id == id))
        .collect();

    Ok(Json(SamplesResponse {
        count: samples.len(),
        samples,
        providers,
    }))
}

/// GET /api/metrics/protocols?protocol=&since=&until=&limit=
///
/// `protocol` matches either a protocol target or a single provider id
pub async fn protocol_metrics(
    State(state): State<ApiState>,
    Query(params): Query<ProtocolQuery>,
) -> ApiResult<Json<SamplesResponse>> {
    check_range(params.since, params.until)?;

    let providers: Vec<_> = state
        .monitor
        .registry
        .list(Some(ProviderKind::Protocol))
        .await
        .into_iter()
        .filter(|p| {
            params
                .protocol
                .as_deref()
                .is_none_or(|name| p.target == name || p.id == name)
        })
        .collect();

    if let Some(protocol) = &params.protocol
        && providers.is_empty()
    {
        return Err(ApiError::NotFound(format!("unknown protocol: {protocol}")));
    }

    let mut samples = vec![];
    for provider in &providers {
        let query = SampleQuery {
            kind: Some(ProviderKind::Protocol),
            provider: Some(provider.id.clone()),
            since: params.since,
            until: params.until,
            limit: params.limit,
            ..SampleQuery::default()
        };
        samples.extend(state.monitor.samples(&query).await);
    }
    samples.sort_by_key(|s| s.timestamp);

    Ok(Json(SamplesResponse {
        count: samples.len(),
        samples,
        providers,
    }))
}

/// GET /api/metrics/series?provider=&metric=&since=&until=
///
/// Raw points of one metric of one provider
pub async fn metric_series(
    State(state): State<ApiState>,
    Query(params): Query<SeriesQuery>,
) -> ApiResult<Json<SeriesResponse>> {
    check_range(params.since, params.until)?;

    if state.monitor.registry.get(&params.provider).await.is_none() {
        return Err(ApiError::NotFound(format!(
            "unknown provider: {}",
            params.provider
        )));
    }

    let points = state
        .monitor
        .series(&params.provider, params.metric, params.since, params.until);

    Ok(Json(SeriesResponse {
        provider_id: params.provider,
        metric: params.metric,
        count: points.len(),
        points,
    }))
}
