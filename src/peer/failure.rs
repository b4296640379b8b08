//! Accrual failure detection.
//!
//! Adaptive liveness estimation over heartbeat arrivals: the detector
//! keeps a bounded window of inter-arrival times and converts the current
//! silence into a suspicion level (phi). A peer is considered failed once
//! phi crosses the threshold, so slow links grow tolerance automatically
//! instead of tripping a fixed timeout.

use std::collections::VecDeque;

/// Inter-arrival samples retained.
const SAMPLE_WINDOW: usize = 32;

/// Suspicion level at which a peer counts as failed.
const PHI_THRESHOLD: f64 = 8.0;

/// Floor on the standard deviation so near-constant intervals do not
/// make the detector hair-triggered.
const MIN_STD_DEV_MS: f64 = 100.0;

/// Phi-accrual failure detector over heartbeat arrivals.
#[derive(Debug)]
pub struct AccrualFailureDetector {
    intervals: VecDeque<u64>,
    last_heartbeat_ms: Option<u64>,
    expected_interval_ms: u64,
    /// Silence tolerated on top of the estimated interval before
    /// suspicion starts accruing. Absorbs the phase offset between the
    /// remote's send schedule and the local check schedule.
    acceptable_pause_ms: u64,
}

impl AccrualFailureDetector {
    /// Create a detector expecting roughly one heartbeat per
    /// `expected_interval_ms` until real samples accumulate.
    pub fn new(expected_interval_ms: u64) -> Self {
        let expected = expected_interval_ms.max(1);
        Self {
            intervals: VecDeque::new(),
            last_heartbeat_ms: None,
            expected_interval_ms: expected,
            acceptable_pause_ms: expected * 2,
        }
    }

    /// Record a heartbeat arrival.
    pub fn heartbeat(&mut self, now_ms: u64) {
        if let Some(last) = self.last_heartbeat_ms {
            let interval = now_ms.saturating_sub(last);
            if self.intervals.len() == SAMPLE_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(interval);
        }
        self.last_heartbeat_ms = Some(now_ms);
    }

    /// Current suspicion level. 0.0 before the first heartbeat.
    pub fn phi(&self, now_ms: u64) -> f64 {
        let last = match self.last_heartbeat_ms {
            Some(last) => last,
            None => return 0.0,
        };
        let elapsed = now_ms.saturating_sub(last) as f64;

        let (mean, std_dev) = self.estimate();
        let mean = mean + self.acceptable_pause_ms as f64;

        // Logistic approximation of the normal tail probability.
        let y = (elapsed - mean) / std_dev;
        let e = (-y * (1.5976 + 0.070566 * y * y)).exp();
        let p_later = if elapsed > mean {
            e / (1.0 + e)
        } else {
            1.0 - 1.0 / (1.0 + e)
        };

        if p_later <= f64::MIN_POSITIVE {
            f64::MAX
        } else {
            -p_later.log10()
        }
    }

    /// Check whether the peer should be considered failed.
    pub fn check_failure(&self, now_ms: u64) -> bool {
        self.phi(now_ms) >= PHI_THRESHOLD
    }

    /// Mean and deviation of the interval distribution, seeded with the
    /// expected interval until samples exist.
    fn estimate(&self) -> (f64, f64) {
        if self.intervals.is_empty() {
            let mean = self.expected_interval_ms as f64;
            return (mean, (mean / 2.0).max(MIN_STD_DEV_MS));
        }

        let n = self.intervals.len() as f64;
        let mean = self.intervals.iter().sum::<u64>() as f64 / n;
        let variance = self
            .intervals
            .iter()
            .map(|&i| {
                let d = i as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt().max(MIN_STD_DEV_MS))
    }
}
