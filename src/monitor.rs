//! Monitor context
//!
//! [`Monitor`] owns every shared component (registry, stores, alert engine,
//! hub) and is constructed once at startup. Workers and API handlers get a
//! clone; all fields are reference counted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::actors::pipeline::PipelineHandle;
use crate::actors::poller::{PollerHandle, PollerSettings};
use crate::actors::source::{HttpSource, SampleSource};
use crate::alerts::{Alert, AlertEngine, AlertEvent, AlertFilter, Severity};
use crate::config::Config;
use crate::error::{MonitorError, MonitorResult};
use crate::hub::{BroadcastHub, Channel, HubEvent, Snapshot, SubscriberReceiver};
use crate::monitors::HealthClassifier;
use crate::notify::WebhookNotifier;
use crate::registry::{Provider, ProviderRegistry};
use crate::sample::{ClassifiedSample, MetricKey, MetricPoint, ProviderKind};
use crate::storage::{MetricsStore, series_key};

/// Samples returned by a query without a time range, per provider
pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

/// Selection of stored classified samples
#[derive(Debug, Clone, Default)]
pub struct SampleQuery {
    pub kind: Option<ProviderKind>,
    pub provider: Option<String>,
    pub target: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    /// Newest samples per provider when no range is given
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct Monitor {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,

    /// Derived values per (provider, metric)
    pub points: Arc<MetricsStore<MetricPoint>>,

    /// Classified samples per provider
    pub samples: Arc<MetricsStore<ClassifiedSample>>,

    pub alerts: Arc<RwLock<AlertEngine>>,
    pub hub: Arc<BroadcastHub>,

    /// Most recent classified sample per provider
    latest: Arc<RwLock<BTreeMap<String, ClassifiedSample>>>,

    notifier: Option<WebhookNotifier>,
}

/// Handles of the workers started by [`Monitor::start`]
pub struct MonitorHandles {
    pub pollers: Vec<PollerHandle>,
    pipeline: PipelineHandle,
    hub: Arc<BroadcastHub>,
}

impl MonitorHandles {
    pub fn poller(&self, target: &str) -> Option<&PollerHandle> {
        self.pollers.iter().find(|p| p.target == target)
    }

    /// Stop all pollers, drain the pipeline and disconnect subscribers
    pub async fn shutdown(self) {
        for poller in &self.pollers {
            if let Err(e) = poller.shutdown().await {
                warn!("failed to stop poller for {}: {e:#}", poller.target);
            }
        }
        drop(self.pollers);
        self.hub.close_all();

        // in-flight cycles still hold senders; don't wait on them forever
        if tokio::time::timeout(Duration::from_secs(5), self.pipeline.join())
            .await
            .is_err()
        {
            warn!("pipeline did not drain in time");
        }
        info!("monitor stopped");
    }
}

impl Monitor {
    /// Validate the configuration and build every component
    pub async fn new(config: Config) -> MonitorResult<Self> {
        config.validate()?;

        let registry = ProviderRegistry::new(
            config.polling.failure_threshold,
            config.polling.latency_ema_alpha,
        );
        for provider in &config.providers {
            registry.register(Provider::from_config(provider)).await?;
        }

        let retention = config.retention.window();
        let default_capacity = config
            .retention
            .capacity_for(config.polling.interval(ProviderKind::Network));
        let points = MetricsStore::new(retention, default_capacity);
        let samples = MetricsStore::new(retention, default_capacity);

        for provider in &config.providers {
            let capacity = config
                .retention
                .capacity_for(config.polling.interval(provider.kind));
            samples.configure(&provider.id, capacity);
            for metric in MetricKey::ALL {
                points.configure(&series_key(&provider.id, metric), capacity);
            }
        }

        let alerts =
            AlertEngine::new(config.alert_rules()).with_info_surfaced(config.alerts.surface_info);
        let hub = BroadcastHub::new(config.hub.queue_depth, config.hub.max_send_failures);
        let notifier = config.alerts.webhook.clone().map(WebhookNotifier::new);

        info!(
            "monitoring {} providers across {} targets with {} alert rules",
            config.providers.len(),
            config.targets().len(),
            alerts.rules().len()
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            points: Arc::new(points),
            samples: Arc::new(samples),
            alerts: Arc::new(RwLock::new(alerts)),
            hub: Arc::new(hub),
            latest: Arc::new(RwLock::new(BTreeMap::new())),
            notifier,
        })
    }

    /// Start polling every target over HTTP
    pub fn start(&self) -> MonitorResult<MonitorHandles> {
        let polling = &self.config.polling;
        let timeout = polling
            .timeout(ProviderKind::Network)
            .max(polling.timeout(ProviderKind::Protocol));
        let source = HttpSource::new(&self.config.providers, timeout)?;
        Ok(self.start_with_source(Arc::new(source)))
    }

    /// Start the pipeline and one poller per target, fetching through `source`
    pub fn start_with_source(&self, source: Arc<dyn SampleSource>) -> MonitorHandles {
        let classifier =
            HealthClassifier::from_providers(self.config.polling.clone(), &self.config.providers);
        let pipeline = PipelineHandle::spawn(self.clone(), classifier);

        let pollers = self
            .config
            .targets()
            .into_iter()
            .filter_map(|(target, providers)| {
                let kind = providers.first()?.kind;
                let settings = PollerSettings {
                    target,
                    kind,
                    interval: self.config.polling.interval(kind),
                    timeout: self.config.polling.timeout(kind),
                };
                debug!("spawning poller for {} ({kind})", settings.target);
                Some(PollerHandle::spawn(
                    settings,
                    self.registry.clone(),
                    source.clone(),
                    pipeline.sender(),
                ))
            })
            .collect();

        MonitorHandles {
            pollers,
            pipeline,
            hub: self.hub.clone(),
        }
    }

    /// Append a classified sample to the stores
    pub async fn record(&self, sample: &ClassifiedSample) {
        self.samples.append(&sample.provider_id, sample.clone());
        for point in sample.points() {
            self.points
                .append(&series_key(&point.provider_id, point.metric), point);
        }
        self.latest
            .write()
            .await
            .insert(sample.provider_id.clone(), sample.clone());
    }

    /// Broadcast an alert transition and forward it to the webhook
    pub fn emit_alert(&self, event: AlertEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.dispatch(event.clone());
        }
        self.hub.publish(Channel::Alerts, event.into());
    }

    /// Latest sample of every provider, optionally of one kind
    pub async fn latest(&self, kind: Option<ProviderKind>) -> Vec<ClassifiedSample> {
        self.latest
            .read()
            .await
            .values()
            .filter(|s| kind.is_none_or(|k| s.kind == k))
            .cloned()
            .collect()
    }

    /// Stored samples matching `query`, oldest first
    pub async fn samples(&self, query: &SampleQuery) -> Vec<ClassifiedSample> {
        let providers = self.registry.list(query.kind).await;
        let limit = query.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT);
        let ranged = query.since.is_some() || query.until.is_some();

        let mut samples: Vec<ClassifiedSample> = providers
            .iter()
            .filter(|p| query.provider.as_deref().is_none_or(|id| p.id == id))
            .filter(|p| query.target.as_deref().is_none_or(|t| p.target == t))
            .flat_map(|p| {
                if ranged {
                    self.samples.query(&p.id, query.since, query.until)
                } else {
                    self.samples.latest(&p.id, limit)
                }
            })
            .collect();

        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    /// Raw points of one metric of one provider
    pub fn series(
        &self,
        provider_id: &str,
        metric: MetricKey,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<MetricPoint> {
        self.points
            .query(&series_key(provider_id, metric), since, until)
    }

    /// Open alerts plus alerts resolved within the retention window, newest first
    pub async fn recent_alerts(&self, severity: Option<Severity>) -> Vec<Alert> {
        let filter = AlertFilter {
            severity,
            resolved_since: Utc::now().checked_sub_signed(self.config.retention.window()),
            open_only: false,
        };
        self.alerts.read().await.list(&filter)
    }

    pub async fn acknowledge_alert(&self, id: u64) -> MonitorResult<Alert> {
        self.alerts.write().await.acknowledge(id)
    }

    /// Resolve an alert by hand; resolving a resolved alert is a no-op
    pub async fn resolve_alert(&self, id: u64) -> MonitorResult<Alert> {
        let event = self.alerts.write().await.resolve(id, Utc::now())?;
        match event {
            Some(event) => {
                let alert = event.alert().clone();
                self.emit_alert(event);
                Ok(alert)
            }
            None => self
                .alerts
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or(MonitorError::UnknownAlert(id)),
        }
    }

    /// Full state for a newly connected subscriber
    pub async fn snapshot(&self) -> Snapshot {
        let latest = self.latest(None).await;
        let (network, protocols): (Vec<_>, Vec<_>) = latest
            .into_iter()
            .partition(|s| s.kind == ProviderKind::Network);

        Snapshot {
            network,
            protocols,
            providers: self.registry.list(None).await,
            alerts: self.recent_alerts(None).await,
            timestamp: Utc::now(),
        }
    }

    /// Subscribe a connection and queue its `initial_data` event
    pub async fn connect(
        &self,
        channels: impl IntoIterator<Item = Channel>,
    ) -> SubscriberReceiver {
        let snapshot = self.snapshot().await;
        let connection_id = self.hub.next_connection_id();
        self.hub
            .subscribe_with(connection_id, channels, Some(HubEvent::InitialData(snapshot)))
    }
}
