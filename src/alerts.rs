//! Threshold alerting
//!
//! ## Alert Lifecycle
//!
//! ```text
//! none ──(condition true)──▶ open ──(condition true, value updates)──▶ open
//!                             │
//!                             └──(condition false / manual resolve)──▶ resolved
//! ```
//!
//! There is at most one open alert per (rule, target). Resolved alerts are
//! kept for history and never reopened; a new trigger creates a new alert.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{MonitorError, MonitorResult};
use crate::sample::{ClassifiedSample, MetricKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// Observed value above threshold
    Gt,
    /// Observed value below threshold
    Lt,
    /// Absolute change since the previous observation above threshold
    Delta,
}

/// How a triggered rule picks its severity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SeverityBands {
    /// Severity from the deviation ratio |observed - threshold| / threshold
    Deviation {
        #[serde(default = "default_warning_ratio")]
        warning: f64,
        #[serde(default = "default_critical_ratio")]
        critical: f64,
    },
    /// Always the same severity
    Fixed { severity: Severity },
}

impl Default for SeverityBands {
    fn default() -> Self {
        SeverityBands::Deviation {
            warning: default_warning_ratio(),
            critical: default_critical_ratio(),
        }
    }
}

fn default_warning_ratio() -> f64 {
    0.2
}

fn default_critical_ratio() -> f64 {
    0.5
}

impl SeverityBands {
    pub fn classify(&self, ratio: f64) -> Severity {
        match *self {
            SeverityBands::Fixed { severity } => severity,
            SeverityBands::Deviation { warning, critical } => {
                if ratio > critical {
                    Severity::Critical
                } else if ratio >= warning {
                    Severity::Warning
                } else {
                    Severity::Info
                }
            }
        }
    }
}

/// |observed - threshold| / |threshold|
pub fn deviation_ratio(observed: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return if observed == 0.0 { 0.0 } else { f64::INFINITY };
    }
    (observed - threshold).abs() / threshold.abs()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub metric: MetricKey,
    pub comparator: Comparator,
    pub threshold: f64,

    #[serde(default)]
    pub severity: SeverityBands,
}

impl AlertRule {
    pub fn validate(&self) -> MonitorResult<()> {
        if self.id.trim().is_empty() {
            return Err(MonitorError::Config("alert rule id must not be empty".into()));
        }
        if !self.threshold.is_finite() {
            return Err(MonitorError::Config(format!(
                "rule {} threshold must be finite",
                self.id
            )));
        }
        // Deviation bands divide by the threshold
        if self.threshold == 0.0
            && self.comparator != Comparator::Delta
            && matches!(self.severity, SeverityBands::Deviation { .. })
        {
            return Err(MonitorError::Config(format!(
                "rule {} threshold must be non-zero for deviation severity",
                self.id
            )));
        }
        if let SeverityBands::Deviation { warning, critical } = self.severity
            && !(warning >= 0.0 && critical >= warning)
        {
            return Err(MonitorError::Config(format!(
                "rule {} severity bands must satisfy 0 <= warning <= critical",
                self.id
            )));
        }
        Ok(())
    }
}

/// A raised alert; resolved alerts stay around for history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub rule_id: String,
    pub target_id: String,
    pub metric: MetricKey,
    pub severity: Severity,
    pub threshold: f64,
    pub observed_value: f64,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Raised(Alert),
    Resolved(Alert),
}

impl AlertEvent {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertEvent::Raised(alert) | AlertEvent::Resolved(alert) => alert,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertEvent::Raised(_) => "alert_raised",
            AlertEvent::Resolved(_) => "alert_resolved",
        }
    }
}

/// Filter for alert history queries
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<Severity>,

    /// Drop resolved alerts resolved before this instant
    pub resolved_since: Option<DateTime<Utc>>,

    pub open_only: bool,
}

type AlertKey = (String, String);

/// Evaluates classified samples against the configured rules
pub struct AlertEngine {
    rules: Vec<AlertRule>,

    /// All alerts ever raised, by id
    alerts: BTreeMap<u64, Alert>,

    /// Open alert per (rule, target)
    open: HashMap<AlertKey, u64>,

    /// Last observed value per (rule, target), for delta rules
    previous: HashMap<AlertKey, f64>,

    next_id: u64,

    /// Lowest severity that creates an alert; lower ones are only logged
    min_surfaced: Severity,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            alerts: BTreeMap::new(),
            open: HashMap::new(),
            previous: HashMap::new(),
            next_id: 1,
            min_surfaced: Severity::Warning,
        }
    }

    pub fn with_info_surfaced(mut self, surface_info: bool) -> Self {
        self.min_surfaced = if surface_info {
            Severity::Info
        } else {
            Severity::Warning
        };
        self
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn evaluate_sample(&mut self, sample: &ClassifiedSample) -> Vec<AlertEvent> {
        self.evaluate(&sample.provider_id, &sample.metrics, sample.timestamp)
    }

    /// Evaluate every rule bound to a metric present in `metrics`
    pub fn evaluate(
        &mut self,
        target_id: &str,
        metrics: &BTreeMap<MetricKey, f64>,
        at: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let mut events = vec![];

        for index in 0..self.rules.len() {
            let rule = &self.rules[index];
            let Some(&value) = metrics.get(&rule.metric) else {
                continue;
            };
            let key: AlertKey = (rule.id.clone(), target_id.to_string());

            let observed = match rule.comparator {
                Comparator::Gt | Comparator::Lt => Some(value),
                Comparator::Delta => self
                    .previous
                    .insert(key.clone(), value)
                    .map(|previous| (value - previous).abs()),
            };

            let holds = observed.is_some_and(|observed| match rule.comparator {
                Comparator::Gt | Comparator::Delta => observed > rule.threshold,
                Comparator::Lt => observed < rule.threshold,
            });

            let rule = rule.clone();
            match (holds, self.open.get(&key).copied()) {
                (true, Some(id)) => {
                    if let Some(alert) = self.alerts.get_mut(&id) {
                        alert.observed_value = observed.unwrap_or(value);
                        trace!("{}: alert {id} still open at {}", rule.id, alert.observed_value);
                    }
                }
                (true, None) => {
                    let observed = observed.unwrap_or(value);
                    let ratio = deviation_ratio(observed, rule.threshold);
                    let severity = rule.severity.classify(ratio);

                    if severity < self.min_surfaced {
                        info!(
                            "{}: {target_id} {} at {observed} (threshold {}, ratio {ratio:.2}) below surfacing severity",
                            rule.id, rule.metric, rule.threshold
                        );
                        continue;
                    }

                    let alert = self.raise(&rule, target_id, severity, observed, at);
                    debug!(
                        "{}: raised {} alert {} for {target_id} ({} = {observed})",
                        rule.id, alert.severity, alert.id, rule.metric
                    );
                    self.open.insert(key, alert.id);
                    events.push(AlertEvent::Raised(alert));
                }
                (false, Some(id)) => {
                    self.open.remove(&key);
                    if let Some(alert) = self.alerts.get_mut(&id) {
                        alert.resolved_at = Some(at);
                        alert.observed_value = observed.unwrap_or(value);
                        debug!("{}: resolved alert {id} for {target_id}", rule.id);
                        events.push(AlertEvent::Resolved(alert.clone()));
                    }
                }
                (false, None) => {}
            }
        }

        events
    }

    fn raise(
        &mut self,
        rule: &AlertRule,
        target_id: &str,
        severity: Severity,
        observed: f64,
        at: DateTime<Utc>,
    ) -> Alert {
        let alert = Alert {
            id: self.next_id,
            rule_id: rule.id.clone(),
            target_id: target_id.to_string(),
            metric: rule.metric,
            severity,
            threshold: rule.threshold,
            observed_value: observed,
            raised_at: at,
            resolved_at: None,
            acknowledged: false,
        };
        self.next_id += 1;
        self.alerts.insert(alert.id, alert.clone());
        alert
    }

    /// Mark an alert as seen; resolution logic is unaffected
    pub fn acknowledge(&mut self, id: u64) -> MonitorResult<Alert> {
        let alert = self
            .alerts
            .get_mut(&id)
            .ok_or(MonitorError::UnknownAlert(id))?;
        alert.acknowledged = true;
        Ok(alert.clone())
    }

    /// Resolve an alert by hand. Returns an event only if it was still open.
    pub fn resolve(&mut self, id: u64, at: DateTime<Utc>) -> MonitorResult<Option<AlertEvent>> {
        let alert = self
            .alerts
            .get_mut(&id)
            .ok_or(MonitorError::UnknownAlert(id))?;

        if !alert.is_open() {
            return Ok(None);
        }

        alert.resolved_at = Some(at);
        let key = (alert.rule_id.clone(), alert.target_id.clone());
        self.open.remove(&key);
        debug!("manually resolved alert {id}");

        Ok(Some(AlertEvent::Resolved(alert.clone())))
    }

    pub fn get(&self, id: u64) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    pub fn open_alerts(&self) -> Vec<Alert> {
        self.alerts.values().filter(|a| a.is_open()).cloned().collect()
    }

    /// Alerts matching `filter`, newest first
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts
            .values()
            .rev()
            .filter(|alert| filter.severity.is_none_or(|s| alert.severity == s))
            .filter(|alert| match alert.resolved_at {
                None => true,
                Some(_) if filter.open_only => false,
                Some(resolved_at) => filter.resolved_since.is_none_or(|since| resolved_at >= since),
            })
            .cloned()
            .collect()
    }
}
