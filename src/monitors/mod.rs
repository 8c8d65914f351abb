//! Health classification
//!
//! - [`network`]: TPS, block time and stall detection for chain RPC providers
//! - [`protocol`]: sliding-window availability for protocol endpoints
//! - [`classifier`]: combines both into [`crate::sample::ClassifiedSample`]s

pub mod classifier;
pub mod network;
pub mod protocol;

pub use classifier::HealthClassifier;
