//! Provider registry
//!
//! Holds configuration and live health state for every upstream endpoint.
//! Pollers for different targets update it concurrently; each update takes
//! the write lock only for the duration of a small state mutation.
//!
//! ```text
//! success ─────────────────────────────▶ healthy (streak reset)
//! failure, streak <  K ────────────────▶ degraded
//! failure, streak >= K ────────────────▶ down
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::ProviderConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::sample::{HealthStatus, ProviderKind};

/// Snapshot of a provider's configuration and live health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provider {
    pub id: String,
    pub kind: ProviderKind,
    pub target: String,
    pub url: String,
    pub priority: u32,
    pub enabled: bool,
    pub status: HealthStatus,

    /// Exponential moving average of successful request latency
    pub latency_ema_ms: Option<f64>,

    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl Provider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            id: config.id.clone(),
            kind: config.kind,
            target: config.target.clone(),
            url: config.url.clone(),
            priority: config.priority,
            enabled: config.enabled,
            status: HealthStatus::Healthy,
            latency_ema_ms: None,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
        }
    }
}

/// Status change caused by a recorded result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Provider>>,

    /// Consecutive failures that mark a provider down
    failure_threshold: u32,

    /// EMA smoothing factor
    alpha: f64,
}

impl ProviderRegistry {
    pub fn new(failure_threshold: u32, alpha: f64) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            alpha,
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub async fn register(&self, provider: Provider) -> MonitorResult<()> {
        let mut providers = self.providers.write().await;
        if providers.contains_key(&provider.id) {
            return Err(MonitorError::Config(format!(
                "provider {} registered twice",
                provider.id
            )));
        }
        providers.insert(provider.id.clone(), provider);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Provider> {
        self.providers.read().await.get(id).cloned()
    }

    /// Providers of a kind (all kinds if `None`), by priority then id
    pub async fn list(&self, kind: Option<ProviderKind>) -> Vec<Provider> {
        let providers = self.providers.read().await;
        let mut list: Vec<Provider> = providers
            .values()
            .filter(|p| kind.is_none_or(|k| p.kind == k))
            .cloned()
            .collect();
        sort_by_priority(&mut list);
        list
    }

    /// Enabled providers of a target, by priority then id
    pub async fn for_target(&self, target: &str) -> Vec<Provider> {
        let providers = self.providers.read().await;
        let mut list: Vec<Provider> = providers
            .values()
            .filter(|p| p.target == target && p.enabled)
            .cloned()
            .collect();
        sort_by_priority(&mut list);
        list
    }

    /// Providers eligible for serving a target: enabled and not down
    pub async fn failover_candidates(&self, target: &str) -> Vec<Provider> {
        let mut list = self.for_target(target).await;
        list.retain(|p| p.status != HealthStatus::Down);
        list
    }

    /// Record the outcome of one request against a provider
    pub async fn mark_result(
        &self,
        id: &str,
        success: bool,
        latency_ms: f64,
    ) -> MonitorResult<Option<StatusTransition>> {
        let mut providers = self.providers.write().await;
        let provider = providers
            .get_mut(id)
            .ok_or_else(|| MonitorError::UnknownProvider(id.to_string()))?;

        let from = provider.status;
        let now = Utc::now();

        if success {
            provider.consecutive_failures = 0;
            provider.last_success = Some(now);
            provider.latency_ema_ms = Some(match provider.latency_ema_ms {
                Some(ema) => self.alpha * latency_ms + (1.0 - self.alpha) * ema,
                None => latency_ms,
            });
            provider.status = HealthStatus::Healthy;
        } else {
            provider.consecutive_failures = provider.consecutive_failures.saturating_add(1);
            provider.last_failure = Some(now);
            provider.status = if provider.consecutive_failures >= self.failure_threshold {
                HealthStatus::Down
            } else {
                HealthStatus::Degraded
            };
        }

        Ok(log_transition(provider, from))
    }

    /// Worsen a provider's status to a classified one (e.g. stalled chain,
    /// low availability); never improves it
    pub async fn escalate(
        &self,
        id: &str,
        status: HealthStatus,
    ) -> MonitorResult<Option<StatusTransition>> {
        let mut providers = self.providers.write().await;
        let provider = providers
            .get_mut(id)
            .ok_or_else(|| MonitorError::UnknownProvider(id.to_string()))?;

        let from = provider.status;
        provider.status = from.max(status);
        Ok(log_transition(provider, from))
    }

    /// Disable or re-enable a provider; disabled providers are not polled
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> MonitorResult<()> {
        let mut providers = self.providers.write().await;
        let provider = providers
            .get_mut(id)
            .ok_or_else(|| MonitorError::UnknownProvider(id.to_string()))?;
        provider.enabled = enabled;
        info!("provider {id} {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}

fn sort_by_priority(list: &mut [Provider]) {
    list.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}

fn log_transition(provider: &Provider, from: HealthStatus) -> Option<StatusTransition> {
    let to = provider.status;
    if from == to {
        return None;
    }

    match to {
        HealthStatus::Healthy => info!("provider {} recovered ({from} -> {to})", provider.id),
        HealthStatus::Degraded => warn!(
            "provider {} degraded after {} failures",
            provider.id, provider.consecutive_failures
        ),
        HealthStatus::Down => error!(
            "provider {} down after {} consecutive failures",
            provider.id, provider.consecutive_failures
        ),
    }

    Some(StatusTransition { from, to })
}
