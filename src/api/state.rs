//! API shared state

use std::sync::Arc;
use std::time::Duration;

use super::middleware::rate_limit::ConnectionLimiter;
use crate::monitor::Monitor;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Registry, stores, alert engine and hub
    pub monitor: Monitor,

    /// Per-address limit on push channel connections
    pub limiter: Arc<ConnectionLimiter>,

    /// How long a single push to a subscriber may take
    pub send_timeout: Duration,
}

impl ApiState {
    pub fn new(monitor: Monitor) -> Self {
        let limiter = Arc::new(ConnectionLimiter::per_minute(
            monitor.config.api.connections_per_minute,
        ));
        let send_timeout = Duration::from_millis(monitor.config.hub.send_timeout_ms);

        Self {
            monitor,
            limiter,
            send_timeout,
        }
    }
}
