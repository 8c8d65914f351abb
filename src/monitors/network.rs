//! Chain-level derived metrics for network providers
//!
//! TPS is computed between consecutive readings of the same provider:
//!
//! ```text
//! tps = (tx_count[n] - tx_count[n-1]) / (block_time[n] - block_time[n-1])
//! ```
//!
//! A slot that does not advance for `stall_polls` consecutive polls marks the
//! provider as stalled.

use crate::sample::NetworkReading;

/// Per-provider state carried between network readings
#[derive(Debug, Clone)]
pub struct NetworkTracker {
    previous: Option<NetworkReading>,
    non_advancing: u32,
    stall_polls: u32,
}

/// Values derived from a reading and its predecessor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkDerived {
    pub tps: Option<f64>,
    pub block_time_ms: Option<f64>,
    pub stalled: bool,
}

impl NetworkTracker {
    pub fn new(stall_polls: u32) -> Self {
        Self {
            previous: None,
            non_advancing: 0,
            stall_polls: stall_polls.max(1),
        }
    }

    pub fn observe(&mut self, reading: &NetworkReading) -> NetworkDerived {
        let derived = match &self.previous {
            Some(previous) => {
                if reading.slot <= previous.slot {
                    self.non_advancing += 1;
                } else {
                    self.non_advancing = 0;
                }

                NetworkDerived {
                    tps: compute_tps(previous, reading),
                    block_time_ms: compute_block_time_ms(previous, reading),
                    stalled: self.non_advancing >= self.stall_polls,
                }
            }
            None => NetworkDerived {
                tps: None,
                block_time_ms: None,
                stalled: false,
            },
        };

        self.previous = Some(reading.clone());
        derived
    }

    pub fn non_advancing_polls(&self) -> u32 {
        self.non_advancing
    }
}

/// Transactions per second between two readings, if time moved forward
pub fn compute_tps(previous: &NetworkReading, current: &NetworkReading) -> Option<f64> {
    let elapsed = current.block_time - previous.block_time;
    if elapsed <= 0 || current.transaction_count < previous.transaction_count {
        return None;
    }
    let transactions = current.transaction_count - previous.transaction_count;
    Some(transactions as f64 / elapsed as f64)
}

/// Average time per slot between two readings, in milliseconds
pub fn compute_block_time_ms(previous: &NetworkReading, current: &NetworkReading) -> Option<f64> {
    let elapsed = current.block_time - previous.block_time;
    if elapsed <= 0 || current.slot <= previous.slot {
        return None;
    }
    Some(elapsed as f64 * 1000.0 / (current.slot - previous.slot) as f64)
}
