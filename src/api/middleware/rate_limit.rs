//! Per-address connection rate limiting
//!
//! Fixed one-minute windows: each source address may open at most `limit`
//! push channel connections per window. Excess requests get 429.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::api::error::ApiError;

/// Entries kept before stale windows are swept
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct ConnectionLimiter {
    /// Connections per window; 0 disables the limit
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl ConnectionLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Count a connection attempt from `ip`, returns whether it is allowed
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());

        if windows.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// Rejects requests from addresses over their connection budget
///
/// Requests without connection info (e.g. in-process tests) pass through.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<ConnectionLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = peer
        && !limiter.check(ip)
    {
        warn!("rejecting connection from {ip}: rate limit exceeded");
        return Err(ApiError::RateLimited(format!(
            "too many connections from {ip}, try again later"
        )));
    }

    Ok(next.run(request).await)
}
