//! Actor-based polling pipeline
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!        ┌───────────────┐        ┌───────────────┐
//!        │ Poller        │  ...   │ Poller        │   one per target,
//!        │ (mainnet)     │        │ (dex)         │   independent intervals
//!        └───────┬───────┘        └───────┬───────┘
//!                │      PollEvent (mpsc)  │
//!                └───────────┬────────────┘
//!                   ┌────────▼────────┐
//!                   │  PipelineActor  │  classify → store → alert
//!                   └────────┬────────┘
//!                   ┌────────▼────────┐
//!                   │  BroadcastHub   │  fan-out to subscribers
//!                   └─────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each poller has an mpsc command channel for control messages
//! 2. **Events**: All pollers feed one mpsc channel drained by the pipeline
//! 3. **Request/Response**: oneshot channels for `poll_now`

pub mod messages;
pub mod pipeline;
pub mod poller;
pub mod source;

pub use messages::{CycleReport, PollEvent, PollerCommand};
pub use pipeline::{PipelineActor, PipelineHandle};
pub use poller::{PollerHandle, PollerSettings};
pub use source::{HttpSource, SampleSource};
