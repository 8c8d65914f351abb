//! HealthClassifier - turns raw samples into classified samples
//!
//! State is kept per provider, so readings of one provider must be fed in
//! arrival order. The pipeline actor is the only caller and guarantees that.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::config::{PollingConfig, ProviderConfig};
use crate::registry::Provider;
use crate::sample::{
    ClassifiedSample, HealthStatus, MetricKey, ProviderKind, Reading, Sample,
};

use super::network::NetworkTracker;
use super::protocol::{AvailabilityWindow, classify_protocol};

pub struct HealthClassifier {
    network: HashMap<String, NetworkTracker>,
    protocol: HashMap<String, AvailabilityWindow>,

    /// Per-provider latency warning overrides
    latency_warnings: HashMap<String, f64>,

    polling: PollingConfig,
}

impl HealthClassifier {
    pub fn new(polling: PollingConfig) -> Self {
        Self {
            network: HashMap::new(),
            protocol: HashMap::new(),
            latency_warnings: HashMap::new(),
            polling,
        }
    }

    pub fn from_providers(polling: PollingConfig, providers: &[ProviderConfig]) -> Self {
        let mut classifier = Self::new(polling);
        for provider in providers {
            if let Some(warning) = provider.latency_warning_ms {
                classifier
                    .latency_warnings
                    .insert(provider.id.clone(), warning);
            }
        }
        classifier
    }

    fn latency_warning(&self, provider_id: &str, kind: ProviderKind) -> f64 {
        self.latency_warnings
            .get(provider_id)
            .copied()
            .unwrap_or_else(|| self.polling.latency_warning_ms(kind))
    }

    fn window(&mut self, provider_id: &str) -> &mut AvailabilityWindow {
        let size = self.polling.availability_window;
        self.protocol
            .entry(provider_id.to_string())
            .or_insert_with(|| AvailabilityWindow::new(size))
    }

    /// Classify a successful sample
    pub fn classify(&mut self, sample: &Sample) -> ClassifiedSample {
        let kind = sample.reading.kind();
        let warning = self.latency_warning(&sample.provider_id, kind);
        let mut metrics = BTreeMap::from([(MetricKey::LatencyMs, sample.latency_ms)]);

        let status = match &sample.reading {
            Reading::Network(reading) => {
                let stall_polls = self.polling.stall_polls;
                let derived = self
                    .network
                    .entry(sample.provider_id.clone())
                    .or_insert_with(|| NetworkTracker::new(stall_polls))
                    .observe(reading);

                metrics.insert(MetricKey::Slot, reading.slot as f64);
                metrics.insert(MetricKey::BlockHeight, reading.block_height as f64);
                if let Some(tps) = derived.tps {
                    metrics.insert(MetricKey::Tps, tps);
                }
                if let Some(block_time_ms) = derived.block_time_ms {
                    metrics.insert(MetricKey::BlockTimeMs, block_time_ms);
                }
                if let Some(supply) = reading.supply {
                    metrics.insert(MetricKey::Supply, supply);
                }

                if derived.stalled {
                    warn!(
                        "{}: slot {} has not advanced, treating as stalled",
                        sample.provider_id, reading.slot
                    );
                    HealthStatus::Degraded
                } else if sample.latency_ms >= warning {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            Reading::Protocol(reading) => {
                let window = self.window(&sample.provider_id);
                window.record(true);
                let availability = window.availability();

                metrics.insert(MetricKey::Availability, availability * 100.0);
                metrics.insert(MetricKey::ErrorRate, (1.0 - availability) * 100.0);
                if let Some(accounts) = reading.account_count {
                    metrics.insert(MetricKey::AccountCount, accounts as f64);
                }

                classify_protocol(availability, Some(sample.latency_ms), warning)
            }
        };

        trace!("{}: classified as {status}", sample.provider_id);

        ClassifiedSample {
            provider_id: sample.provider_id.clone(),
            target: sample.target.clone(),
            kind,
            timestamp: sample.timestamp,
            status,
            metrics,
            reading: Some(sample.reading.clone()),
            error: None,
        }
    }

    /// Classify a failed poll; `provider` is the registry state after the failure
    pub fn classify_failure(
        &mut self,
        provider: &Provider,
        error: &str,
        at: DateTime<Utc>,
    ) -> ClassifiedSample {
        let mut metrics = BTreeMap::from([(
            MetricKey::ConsecutiveFailures,
            provider.consecutive_failures as f64,
        )]);

        let status = match provider.kind {
            ProviderKind::Network => provider.status,
            ProviderKind::Protocol => {
                let window = self.window(&provider.id);
                window.record(false);
                let availability = window.availability();

                metrics.insert(MetricKey::Availability, availability * 100.0);
                metrics.insert(MetricKey::ErrorRate, (1.0 - availability) * 100.0);

                let warning = self.latency_warning(&provider.id, ProviderKind::Protocol);
                classify_protocol(availability, None, warning).max(provider.status)
            }
        };

        ClassifiedSample {
            provider_id: provider.id.clone(),
            target: provider.target.clone(),
            kind: provider.kind,
            timestamp: at,
            status,
            metrics,
            reading: None,
            error: Some(error.to_string()),
        }
    }
}
