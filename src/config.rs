use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::trace;

use crate::alerts::{AlertRule, Comparator, SeverityBands};
use crate::error::{MonitorError, MonitorResult};
use crate::sample::{MetricKey, ProviderKind};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,

    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub api: ApiSettings,
}

/// Scheduling and classification knobs shared by all providers of a class
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_network_interval")]
    pub network_interval_secs: u64,

    #[serde(default = "default_protocol_interval")]
    pub protocol_interval_secs: u64,

    #[serde(default = "default_network_timeout")]
    pub network_timeout_ms: u64,

    #[serde(default = "default_protocol_timeout")]
    pub protocol_timeout_ms: u64,

    /// Consecutive failures before a provider is considered down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive non-advancing slots before a network provider is stalled
    #[serde(default = "default_stall_polls")]
    pub stall_polls: u32,

    /// Number of checks in the protocol availability window
    #[serde(default = "default_availability_window")]
    pub availability_window: usize,

    #[serde(default = "default_ema_alpha")]
    pub latency_ema_alpha: f64,

    #[serde(default = "default_latency_warning")]
    pub network_latency_warning_ms: f64,

    #[serde(default = "default_latency_warning")]
    pub protocol_latency_warning_ms: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            network_interval_secs: default_network_interval(),
            protocol_interval_secs: default_protocol_interval(),
            network_timeout_ms: default_network_timeout(),
            protocol_timeout_ms: default_protocol_timeout(),
            failure_threshold: default_failure_threshold(),
            stall_polls: default_stall_polls(),
            availability_window: default_availability_window(),
            latency_ema_alpha: default_ema_alpha(),
            network_latency_warning_ms: default_latency_warning(),
            protocol_latency_warning_ms: default_latency_warning(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self, kind: ProviderKind) -> Duration {
        match kind {
            ProviderKind::Network => Duration::from_secs(self.network_interval_secs),
            ProviderKind::Protocol => Duration::from_secs(self.protocol_interval_secs),
        }
    }

    pub fn timeout(&self, kind: ProviderKind) -> Duration {
        match kind {
            ProviderKind::Network => Duration::from_millis(self.network_timeout_ms),
            ProviderKind::Protocol => Duration::from_millis(self.protocol_timeout_ms),
        }
    }

    pub fn latency_warning_ms(&self, kind: ProviderKind) -> f64 {
        match kind {
            ProviderKind::Network => self.network_latency_warning_ms,
            ProviderKind::Protocol => self.protocol_latency_warning_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,

    /// Logical network or protocol; providers sharing a target fail over to each other
    pub target: String,

    pub url: String,

    /// Lower value is preferred
    #[serde(default)]
    pub priority: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub fields: FieldMap,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Accepted HTTP status codes (any 2xx if unset)
    pub expected_status: Option<Vec<u16>>,

    /// Regex the response body must match
    pub body_pattern: Option<String>,

    /// Overrides the class-wide latency warning threshold
    pub latency_warning_ms: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum RequestConfig {
    JsonRpc {
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Rest {
        #[serde(default)]
        method: HttpMethod,
    },
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig::Rest {
            method: HttpMethod::Get,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
}

/// JSON pointers locating reading fields inside a provider response
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMap {
    #[serde(default = "default_slot_field")]
    pub slot: String,

    #[serde(default = "default_block_height_field")]
    pub block_height: String,

    #[serde(default = "default_transaction_count_field")]
    pub transaction_count: String,

    #[serde(default = "default_block_time_field")]
    pub block_time: String,

    pub supply: Option<String>,

    /// Protocol status field, must read ok/up/healthy/true when set
    pub status: Option<String>,

    pub account_count: Option<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            slot: default_slot_field(),
            block_height: default_block_height_field(),
            transaction_count: default_transaction_count_field(),
            block_time: default_block_time_field(),
            supply: None,
            status: None,
            account_count: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsConfig {
    /// Rules to evaluate; built-in defaults are used when unset
    pub rules: Option<Vec<AlertRule>>,

    /// Surface info-severity alerts instead of only logging them
    #[serde(default)]
    pub surface_info: bool,

    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_secs")]
    pub window_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_retention_secs(),
        }
    }
}

/// Longest accepted retention window, ten years
pub const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Largest accepted subscriber queue depth
pub const MAX_QUEUE_DEPTH: usize = 1 << 16;

impl RetentionConfig {
    /// Retention window as a signed duration, saturating at the largest one chrono holds
    pub fn window(&self) -> chrono::Duration {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Ring buffer capacity holding the retention window at the given poll interval
    pub fn capacity_for(&self, interval: Duration) -> usize {
        let interval_secs = interval.as_secs().max(1);
        self.window_secs.div_ceil(interval_secs).max(1) as usize
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Consecutive failed sends before a subscriber is disconnected
    #[serde(default = "default_max_send_failures")]
    pub max_send_failures: u32,

    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            max_send_failures: default_max_send_failures(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    #[serde(default = "default_enabled")]
    pub enable_cors: bool,

    /// Push channel connections accepted per source address per minute
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: true,
            connections_per_minute: default_connections_per_minute(),
        }
    }
}

fn default_network_interval() -> u64 {
    10
}

fn default_protocol_interval() -> u64 {
    30
}

fn default_network_timeout() -> u64 {
    10_000
}

fn default_protocol_timeout() -> u64 {
    15_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_stall_polls() -> u32 {
    3
}

fn default_availability_window() -> usize {
    10
}

fn default_ema_alpha() -> f64 {
    0.3
}

fn default_latency_warning() -> f64 {
    1000.0
}

fn default_enabled() -> bool {
    true
}

fn default_slot_field() -> String {
    String::from("/result/slot")
}

fn default_block_height_field() -> String {
    String::from("/result/blockHeight")
}

fn default_transaction_count_field() -> String {
    String::from("/result/transactionCount")
}

fn default_block_time_field() -> String {
    String::from("/result/blockTime")
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_queue_depth() -> usize {
    100
}

fn default_max_send_failures() -> u32 {
    3
}

fn default_send_timeout() -> u64 {
    5_000
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_connections_per_minute() -> u32 {
    30
}

impl Config {
    /// Reject definitions the monitor cannot run with
    pub fn validate(&self) -> MonitorResult<()> {
        let polling = &self.polling;
        if polling.network_interval_secs == 0 || polling.protocol_interval_secs == 0 {
            return Err(config_error("poll intervals must be positive"));
        }
        if polling.network_timeout_ms == 0 || polling.protocol_timeout_ms == 0 {
            return Err(config_error("poll timeouts must be positive"));
        }
        if polling.failure_threshold == 0 {
            return Err(config_error("failure_threshold must be at least 1"));
        }
        if polling.stall_polls == 0 {
            return Err(config_error("stall_polls must be at least 1"));
        }
        if polling.availability_window == 0 {
            return Err(config_error("availability_window must be at least 1"));
        }
        if !(polling.latency_ema_alpha > 0.0 && polling.latency_ema_alpha <= 1.0) {
            return Err(config_error("latency_ema_alpha must be in (0, 1]"));
        }
        if self.hub.queue_depth == 0 || self.hub.queue_depth > MAX_QUEUE_DEPTH {
            return Err(config_error(format!(
                "hub queue_depth must be between 1 and {MAX_QUEUE_DEPTH}"
            )));
        }
        if self.hub.max_send_failures == 0 {
            return Err(config_error("hub max_send_failures must be at least 1"));
        }
        if self.retention.window_secs == 0 || self.retention.window_secs > MAX_RETENTION_SECS {
            return Err(config_error(format!(
                "retention window_secs must be between 1 and {MAX_RETENTION_SECS}"
            )));
        }

        if self.providers.is_empty() {
            return Err(config_error("at least one provider must be configured"));
        }

        let mut ids = HashSet::new();
        let mut target_kinds: HashMap<&str, ProviderKind> = HashMap::new();
        for provider in &self.providers {
            provider.validate()?;

            if !ids.insert(provider.id.as_str()) {
                return Err(config_error(format!("duplicate provider id {}", provider.id)));
            }

            match target_kinds.insert(provider.target.as_str(), provider.kind) {
                Some(kind) if kind != provider.kind => {
                    return Err(config_error(format!(
                        "target {} mixes network and protocol providers",
                        provider.target
                    )));
                }
                _ => {}
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in self.alert_rules() {
            rule.validate()?;
            if !rule_ids.insert(rule.id.clone()) {
                return Err(config_error(format!("duplicate alert rule id {}", rule.id)));
            }
        }

        if let Some(webhook) = &self.alerts.webhook {
            reqwest::Url::parse(&webhook.url)
                .map_err(|e| config_error(format!("invalid webhook url {}: {e}", webhook.url)))?;
        }

        Ok(())
    }

    /// Configured alert rules, or the built-in defaults
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        match &self.alerts.rules {
            Some(rules) => rules.clone(),
            None => default_rules(self.polling.failure_threshold),
        }
    }

    /// Providers grouped by target, in configuration order
    pub fn targets(&self) -> BTreeMap<String, Vec<ProviderConfig>> {
        let mut targets: BTreeMap<String, Vec<ProviderConfig>> = BTreeMap::new();
        for provider in &self.providers {
            targets
                .entry(provider.target.clone())
                .or_default()
                .push(provider.clone());
        }
        targets
    }
}

impl ProviderConfig {
    fn validate(&self) -> MonitorResult<()> {
        if self.id.trim().is_empty() {
            return Err(config_error("provider id must not be empty"));
        }
        if self.target.trim().is_empty() {
            return Err(config_error(format!("provider {} has no target", self.id)));
        }
        reqwest::Url::parse(&self.url)
            .map_err(|e| config_error(format!("provider {} has invalid url: {e}", self.id)))?;

        if let Some(pattern) = &self.body_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                config_error(format!("provider {} has invalid body pattern: {e}", self.id))
            })?;
        }

        if let Some(warning) = self.latency_warning_ms
            && !(warning.is_finite() && warning > 0.0)
        {
            return Err(config_error(format!(
                "provider {} latency warning must be positive",
                self.id
            )));
        }

        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> MonitorError {
    MonitorError::Config(msg.into())
}

fn default_rules(failure_threshold: u32) -> Vec<AlertRule> {
    vec![
        AlertRule {
            id: String::from("provider-down"),
            metric: MetricKey::ConsecutiveFailures,
            comparator: Comparator::Gt,
            threshold: failure_threshold.saturating_sub(1) as f64,
            severity: SeverityBands::Fixed {
                severity: crate::alerts::Severity::Critical,
            },
        },
        AlertRule {
            id: String::from("high-latency"),
            metric: MetricKey::LatencyMs,
            comparator: Comparator::Gt,
            threshold: 1000.0,
            severity: SeverityBands::default(),
        },
        AlertRule {
            id: String::from("low-availability"),
            metric: MetricKey::Availability,
            comparator: Comparator::Lt,
            threshold: 98.0,
            severity: SeverityBands::default(),
        },
    ]
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let config: Config =
        serde_json::from_str(&file_content).context("Invalid configuration file provided!")?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
