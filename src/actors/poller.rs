//! PollerActor - Polls the providers of one target with failover
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─┬─ cycle in flight? ── skip tick (warn)
//!             └─ spawn cycle: try candidates by priority ─▶ PollEvent ─▶ PipelineActor
//!                              └─ probe down providers for recovery
//!     ↑
//!     └─── Commands (PollNow, UpdateInterval, Shutdown)
//! ```
//!
//! Cycles run in their own task so a hung provider never blocks the command
//! loop. A cycle ends at the latest after `timeout` per tried provider; late
//! responses are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::registry::{Provider, ProviderRegistry};
use crate::sample::{HealthStatus, ProviderKind};

use super::messages::{CycleReport, PollEvent, PollerCommand};
use super::source::SampleSource;

/// Static settings of one poller
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub target: String,
    pub kind: ProviderKind,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Everything a cycle needs; cloned into the cycle task
#[derive(Clone)]
struct CycleContext {
    target: String,
    timeout: Duration,
    registry: Arc<ProviderRegistry>,
    source: Arc<dyn SampleSource>,
    event_tx: mpsc::Sender<PollEvent>,
}

/// Clears the in-flight flag when the cycle task ends, even if it panics
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Actor that polls all providers of a single target
pub struct PollerActor {
    context: CycleContext,
    kind: ProviderKind,
    command_rx: mpsc::Receiver<PollerCommand>,
    interval_duration: Duration,
    in_flight: Arc<AtomicBool>,
}

impl PollerActor {
    fn new(
        settings: PollerSettings,
        registry: Arc<ProviderRegistry>,
        source: Arc<dyn SampleSource>,
        event_tx: mpsc::Sender<PollEvent>,
        command_rx: mpsc::Receiver<PollerCommand>,
        in_flight: Arc<AtomicBool>,
    ) -> Self {
        Self {
            context: CycleContext {
                target: settings.target,
                timeout: settings.timeout,
                registry,
                source,
                event_tx,
            },
            kind: settings.kind,
            command_rx,
            interval_duration: settings.interval,
            in_flight,
        }
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Start a cycle unless one is still running
    fn start_cycle(&self, respond_to: Option<oneshot::Sender<MonitorResult<CycleReport>>>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!(
                "previous cycle for {} still in flight, skipping",
                self.context.target
            );
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(Err(MonitorError::CycleInFlight(
                    self.context.target.clone(),
                )));
            }
            return;
        }

        let guard = InFlightGuard(self.in_flight.clone());
        let context = self.context.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let report = run_cycle(&context).await;
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(Ok(report));
            }
        });
    }

    /// Run the actor's main loop
    ///
    /// This is the entry point for the actor. It runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(target = %self.context.target, kind = %self.kind))]
    pub async fn run(mut self) {
        debug!("starting poller actor");

        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.start_cycle(None);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PollerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            self.start_cycle(Some(respond_to));
                        }

                        PollerCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = self.ticker();
                            // the fresh ticker fires immediately, skip that tick
                            ticker.reset();
                        }

                        PollerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("poller actor stopped");
    }
}

/// One cycle: fail over through the candidates, then probe down providers
#[instrument(skip(context), fields(target = %context.target))]
async fn run_cycle(context: &CycleContext) -> CycleReport {
    let mut report = CycleReport {
        target: context.target.clone(),
        ..CycleReport::default()
    };

    for provider in context.registry.failover_candidates(&context.target).await {
        match poll_once(context, &provider).await {
            Ok(()) => {
                report.served_by = Some(provider.id);
                break;
            }
            // parse errors fail over like transport errors
            Err(e) => {
                debug!("failing over from {}: {e}", provider.id);
                report.failed.push(provider.id);
            }
        }
    }

    if report.served_by.is_none() {
        error!("no provider for {} answered this cycle", context.target);
    }

    let down: Vec<Provider> = context
        .registry
        .for_target(&context.target)
        .await
        .into_iter()
        .filter(|p| p.status == HealthStatus::Down && !report.failed.contains(&p.id))
        .collect();

    if !down.is_empty() {
        let probes = down.iter().map(|provider| async move {
            let recovered = poll_once(context, provider).await.is_ok();
            if recovered {
                info!("provider {} answered recovery probe", provider.id);
            }
            provider.id.clone()
        });
        report.probed = join_all(probes).await;
    }

    trace!("cycle finished: {report:?}");
    report
}

/// Poll one provider, record the outcome and hand it to the pipeline
async fn poll_once(context: &CycleContext, provider: &Provider) -> MonitorResult<()> {
    let started = Instant::now();

    let result = match tokio::time::timeout(context.timeout, context.source.fetch(provider)).await
    {
        Ok(result) => result,
        Err(_) => Err(MonitorError::Timeout {
            provider: provider.id.clone(),
            after_ms: context.timeout.as_millis() as u64,
        }),
    };

    match result {
        Ok(sample) => {
            context
                .registry
                .mark_result(&provider.id, true, sample.latency_ms)
                .await?;
            if context.event_tx.send(PollEvent::Sample(sample)).await.is_err() {
                warn!("pipeline gone, dropping sample of {}", provider.id);
            }
            Ok(())
        }
        Err(e) => {
            warn!("poll of {} failed: {e}", provider.id);
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            context
                .registry
                .mark_result(&provider.id, false, elapsed_ms)
                .await?;

            if let Some(provider) = context.registry.get(&provider.id).await {
                let event = PollEvent::Failed {
                    provider,
                    error: e.clone(),
                    at: Utc::now(),
                };
                if context.event_tx.send(event).await.is_err() {
                    warn!("pipeline gone, dropping failure event");
                }
            }
            Err(e)
        }
    }
}

/// Handle for controlling a PollerActor
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
    in_flight: Arc<AtomicBool>,
    pub target: String,
    pub kind: ProviderKind,
}

impl PollerHandle {
    /// Spawn a new poller actor
    pub fn spawn(
        settings: PollerSettings,
        registry: Arc<ProviderRegistry>,
        source: Arc<dyn SampleSource>,
        event_tx: mpsc::Sender<PollEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let in_flight = Arc::new(AtomicBool::new(false));

        let target = settings.target.clone();
        let kind = settings.kind;
        let actor = PollerActor::new(
            settings,
            registry,
            source,
            event_tx,
            cmd_rx,
            in_flight.clone(),
        );

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            in_flight,
            target,
            kind,
        }
    }

    /// Run a cycle now and wait for its report
    pub async fn poll_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        let report = rx.await.context("failed to receive response")??;
        Ok(report)
    }

    /// Update the polling interval
    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(PollerCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    /// Stop the poller
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}
