//! Per-peer latency sampling.

use std::collections::VecDeque;
use thiserror::Error;

/// Number of samples retained; older samples are evicted.
pub const LATENCY_WINDOW: usize = 6;

/// Errors related to latency queries.
#[derive(Debug, Error)]
pub enum LatencyError {
    #[error("no latency samples recorded")]
    NoSamples,
}

/// Bounded window of round-trip samples with an integer-mean summary.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    samples: VecDeque<u64>,
}

impl LatencyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a round-trip sample in milliseconds.
    pub fn record(&mut self, sample_ms: u64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
    }

    /// Integer mean over the current window.
    pub fn latency(&self) -> Result<u64, LatencyError> {
        if self.samples.is_empty() {
            return Err(LatencyError::NoSamples);
        }
        let sum: u64 = self.samples.iter().sum();
        Ok(sum / self.samples.len() as u64)
    }

    /// Number of samples currently held.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
