//! Bounded rolling window of request samples.

use std::collections::VecDeque;

use serde::Serialize;

/// One evaluated request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Wall-clock latency, milliseconds.
    pub latency_ms: f64,
    /// Whether the request touched a high-priority rule or category.
    pub high_priority: bool,
}

/// Aggregates over the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowStats {
    /// Samples held.
    pub samples: usize,
    /// 95th percentile latency, milliseconds.
    pub p95_ms: f64,
    /// Fraction of samples marked high-priority.
    pub high_priority_share: f64,
}

/// The last `capacity` samples.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl RollingWindow {
    /// An empty window holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Add a sample, dropping the oldest when full.
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank 95th percentile of latency. 0 when empty.
    pub fn p95_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut latencies: Vec<f64> = self.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(f64::total_cmp);
        let rank = ((latencies.len() as f64) * 0.95).ceil() as usize;
        latencies[rank.clamp(1, latencies.len()) - 1]
    }

    /// Fraction of high-priority samples. 0 when empty.
    pub fn high_priority_share(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let high = self.samples.iter().filter(|s| s.high_priority).count();
        high as f64 / self.samples.len() as f64
    }

    /// Current aggregates.
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            samples: self.len(),
            p95_ms: self.p95_ms(),
            high_priority_share: self.high_priority_share(),
        }
    }
}
