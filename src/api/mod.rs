//! REST API and WebSocket push channel
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Monitor context** for querying the registry, stores and alert engine
//! - **WebSocket** subscribers fed by the broadcast hub
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/providers` - Registered providers with live status
//! - `GET /api/metrics/network` - Recent network samples
//! - `GET /api/metrics/protocols` - Recent protocol samples
//! - `GET /api/metrics/series` - Raw points of one metric
//! - `GET /api/alerts` - Open and recently resolved alerts
//! - `POST /api/alerts/:id/resolve` - Resolve an alert
//! - `POST /api/alerts/:id/acknowledge` - Acknowledge an alert
//! - `WS /api/stream` - Push channel (rate limited per address)

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboard
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind_addr,
            enable_cors: settings.enable_cors,
        }
    }
}

/// Build the router with all routes
#[cfg(feature = "api")]
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let stream = Router::new()
        .route("/api/stream", get(websocket::websocket_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.limiter.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ));

    let mut app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/providers", get(routes::providers::list_providers))
        .route("/api/metrics/network", get(routes::metrics::network_metrics))
        .route(
            "/api/metrics/protocols",
            get(routes::metrics::protocol_metrics),
        )
        .route("/api/metrics/series", get(routes::metrics::metric_series))
        .route("/api/alerts", get(routes::alerts::list_alerts))
        .route("/api/alerts/:id/resolve", post(routes::alerts::resolve_alert))
        .route(
            "/api/alerts/:id/acknowledge",
            post(routes::alerts::acknowledge_alert),
        )
        .merge(stream)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Add CORS if enabled
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    // Spawn server in background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
