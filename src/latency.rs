//! Rolling completion-latency window.

use std::collections::VecDeque;
use std::time::Duration;

/// Fixed-capacity FIFO of the most recent completion latencies.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    /// Create an empty window holding at most `capacity` samples.
    ///
    /// A zero capacity is treated as one; configuration validation rejects it
    /// before it gets here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a latency, evicting the oldest sample when full.
    ///
    /// Returns the new rolling mean.
    pub fn record(&mut self, elapsed: Duration) -> Duration {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
        self.mean().unwrap_or_default()
    }

    /// Mean over the retained samples, `None` before the first sample.
    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
