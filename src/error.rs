//! Error types for the monitoring core
//!
//! Transport and parse errors never escape a poll cycle. Both fail the
//! cycle over to the next provider and count against the provider's
//! health. Config errors are only produced at startup and are fatal there.

use std::fmt;

/// Result type alias for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors that can occur in the monitoring core
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// Network level failure talking to a provider
    Transport(String),

    /// Provider did not answer before the cycle's timeout boundary
    Timeout { provider: String, after_ms: u64 },

    /// Provider answered with something that can't be turned into a sample
    Parse(String),

    /// Invalid provider, threshold or hub definition
    Config(String),

    /// Subscriber queue was full and events were dropped
    Overflow { connection: u64, dropped: u64 },

    /// No provider registered under this id
    UnknownProvider(String),

    /// No alert with this id
    UnknownAlert(u64),

    /// A poll cycle for this target is still running
    CycleInFlight(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Transport(msg) => write!(f, "transport error: {}", msg),
            MonitorError::Timeout { provider, after_ms } => {
                write!(f, "provider {} timed out after {}ms", provider, after_ms)
            }
            MonitorError::Parse(msg) => write!(f, "malformed provider response: {}", msg),
            MonitorError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            MonitorError::Overflow {
                connection,
                dropped,
            } => write!(
                f,
                "subscriber {} queue overflowed, {} events dropped",
                connection, dropped
            ),
            MonitorError::UnknownProvider(id) => write!(f, "unknown provider: {}", id),
            MonitorError::UnknownAlert(id) => write!(f, "unknown alert: {}", id),
            MonitorError::CycleInFlight(target) => {
                write!(f, "poll cycle for {} is still in flight", target)
            }
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MonitorError::Parse(err.to_string())
        } else {
            MonitorError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Parse(err.to_string())
    }
}
