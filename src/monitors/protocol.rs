//! Availability tracking for protocol endpoints

use std::collections::VecDeque;

use crate::sample::HealthStatus;

/// Availability at or above this is healthy (given normal latency)
pub const HEALTHY_AVAILABILITY: f64 = 0.98;

/// Availability at or above this is degraded; below is down
pub const DEGRADED_AVAILABILITY: f64 = 0.90;

/// Sliding window of check outcomes
#[derive(Debug, Clone)]
pub struct AvailabilityWindow {
    outcomes: VecDeque<bool>,
    size: usize,
}

impl AvailabilityWindow {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            outcomes: VecDeque::with_capacity(size),
            size,
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// successes / total, in [0, 1]; 1.0 before any check
    pub fn availability(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        successes as f64 / self.outcomes.len() as f64
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Status from availability (0..=1) and the latest latency, if any
pub fn classify_protocol(
    availability: f64,
    latency_ms: Option<f64>,
    latency_warning_ms: f64,
) -> HealthStatus {
    let latency_elevated = latency_ms.is_some_and(|latency| latency >= latency_warning_ms);

    if availability >= HEALTHY_AVAILABILITY && !latency_elevated {
        HealthStatus::Healthy
    } else if availability >= DEGRADED_AVAILABILITY {
        HealthStatus::Degraded
    } else {
        HealthStatus::Down
    }
}
