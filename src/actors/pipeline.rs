//! PipelineActor - Classify, store, alert and broadcast poll outcomes
//!
//! ## Message Flow
//!
//! ```text
//! PollEvent → HealthClassifier → MetricsStore → AlertEngine → BroadcastHub
//!                                                    └──────→ WebhookNotifier
//! ```
//!
//! There is exactly one pipeline actor, so events of a provider are
//! classified and stored in the order its poller produced them.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::alerts::AlertEvent;
use crate::hub::HubEvent;
use crate::monitor::Monitor;
use crate::monitors::HealthClassifier;
use crate::sample::{ClassifiedSample, HealthStatus, MetricKey};

use super::messages::PollEvent;

pub struct PipelineActor {
    monitor: Monitor,
    classifier: HealthClassifier,
    event_rx: mpsc::Receiver<PollEvent>,
}

impl PipelineActor {
    pub fn new(
        monitor: Monitor,
        classifier: HealthClassifier,
        event_rx: mpsc::Receiver<PollEvent>,
    ) -> Self {
        Self {
            monitor,
            classifier,
            event_rx,
        }
    }

    /// Run until every poller (every event sender) is gone
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting pipeline actor");

        while let Some(event) = self.event_rx.recv().await {
            self.handle(event).await;
        }

        debug!("pipeline actor stopped");
    }

    /// Process one poll outcome, returning the alert events it caused
    pub async fn handle(&mut self, event: PollEvent) -> Vec<AlertEvent> {
        let classified = self.classify(event).await;
        self.monitor.record(&classified).await;

        let alert_events = self
            .monitor
            .alerts
            .write()
            .await
            .evaluate_sample(&classified);

        let (channel, event) = HubEvent::metrics(classified);
        let delivered = self.monitor.hub.publish(channel, event);
        trace!("metrics event queued for {delivered} subscribers");

        for alert_event in &alert_events {
            self.monitor.emit_alert(alert_event.clone());
        }

        alert_events
    }

    async fn classify(&mut self, event: PollEvent) -> ClassifiedSample {
        let classified = match event {
            PollEvent::Sample(sample) => {
                let mut classified = self.classifier.classify(&sample);
                classified.metrics.insert(MetricKey::ConsecutiveFailures, 0.0);
                classified
            }
            PollEvent::Failed {
                provider,
                error,
                at,
            } => self
                .classifier
                .classify_failure(&provider, &error.to_string(), at),
        };

        // keep the registry in step with what the sample reports
        if classified.status != HealthStatus::Healthy
            && let Err(e) = self
                .monitor
                .registry
                .escalate(&classified.provider_id, classified.status)
                .await
        {
            warn!(
                "failed to mark {} {}: {e}",
                classified.provider_id, classified.status
            );
        }
        classified
    }
}

/// Handle to the running pipeline
pub struct PipelineHandle {
    sender: mpsc::Sender<PollEvent>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn spawn(monitor: Monitor, classifier: HealthClassifier) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let actor = PipelineActor::new(monitor, classifier, event_rx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: event_tx,
            task,
        }
    }

    /// Sender for pollers (or anything else producing poll outcomes)
    pub fn sender(&self) -> mpsc::Sender<PollEvent> {
        self.sender.clone()
    }

    /// Drop our sender and wait for the actor to drain its queue
    ///
    /// Returns once all other senders are gone as well.
    pub async fn join(self) {
        drop(self.sender);
        if let Err(e) = self.task.await {
            warn!("pipeline task failed: {e}");
        }
    }
}
