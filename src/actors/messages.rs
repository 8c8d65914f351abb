//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to a specific poller via mpsc
//! 2. **Events**: Poll outcomes flow from every poller into the single pipeline actor
//! 3. **Ordering**: A provider is polled by exactly one poller whose cycles never
//!    overlap, so its events reach the pipeline in the order they were taken

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{MonitorError, MonitorResult};
use crate::registry::Provider;
use crate::sample::Sample;

/// Outcome of a single request against a provider
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// The provider answered and the response parsed into a sample
    Sample(Sample),

    /// The request failed, timed out or could not be parsed
    Failed {
        /// Registry state right after the failure was recorded
        provider: Provider,
        error: MonitorError,
        at: DateTime<Utc>,
    },
}

impl PollEvent {
    pub fn provider_id(&self) -> &str {
        match self {
            PollEvent::Sample(sample) => &sample.provider_id,
            PollEvent::Failed { provider, .. } => &provider.id,
        }
    }
}

/// Commands that can be sent to a PollerActor
#[derive(Debug)]
pub enum PollerCommand {
    /// Run a cycle right away, bypassing the interval timer
    ///
    /// Answered with [`MonitorError::CycleInFlight`] if a cycle is running.
    PollNow {
        respond_to: oneshot::Sender<MonitorResult<CycleReport>>,
    },

    /// Change the polling interval; the next tick uses the new value
    UpdateInterval { interval_secs: u64 },

    /// Stop ticking. A running cycle finishes on its own.
    Shutdown,
}

/// Summary of one poll cycle over a target's providers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub target: String,

    /// Provider whose sample served the cycle, if any answered
    pub served_by: Option<String>,

    /// Providers that failed during failover, in the order they were tried
    pub failed: Vec<String>,

    /// Down providers probed for recovery after the cycle
    pub probed: Vec<String>,
}
