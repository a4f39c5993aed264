//! Bounded sample history.
//!
//! [`HistoryBuffer`] keeps the most recent `(time, weight)` pairs in two
//! index-aligned queues. It has no locking of its own; the processor owns it
//! behind the single mutex that also serializes estimation.

use std::collections::VecDeque;

/// Default number of samples retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Fixed-capacity FIFO of recent samples.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    times: VecDeque<f64>,
    weights: VecDeque<f64>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            times: VecDeque::with_capacity(capacity + 1),
            weights: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Maximum number of samples retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raise the capacity to at least `capacity`. Never shrinks.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.capacity = capacity;
        }
    }

    /// Append a sample, evicting the oldest ones beyond capacity.
    pub fn append(&mut self, time: f64, weight: f64) {
        self.times.push_back(time);
        self.weights.push_back(weight);
        while self.times.len() > self.capacity {
            self.times.pop_front();
        }
        while self.weights.len() > self.capacity {
            self.weights.pop_front();
        }
    }

    /// Number of complete samples.
    ///
    /// Takes the shorter of the two queues rather than trusting that they
    /// are equal.
    pub fn available(&self) -> usize {
        self.times.len().min(self.weights.len())
    }

    /// Whether no samples are held.
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.times.clear();
        self.weights.clear();
    }

    /// Copy the complete samples, oldest first.
    pub fn snapshot(&self) -> HistorySnapshot {
        let n = self.available();
        let skip_t = self.times.len() - n;
        let skip_w = self.weights.len() - n;
        HistorySnapshot {
            times: self.times.iter().skip(skip_t).copied().collect(),
            weights: self.weights.iter().skip(skip_w).copied().collect(),
        }
    }
}

/// Immutable copy of the history, oldest sample first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    times: Vec<f64>,
    weights: Vec<f64>,
}

impl HistorySnapshot {
    /// Build a snapshot from `(time, weight)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self {
            times: pairs.iter().map(|p| p.0).collect(),
            weights: pairs.iter().map(|p| p.1).collect(),
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Sample times, oldest first.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Sample weights, oldest first.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Newest `(time, weight)` pair.
    pub fn latest(&self) -> Option<(f64, f64)> {
        Some((*self.times.last()?, *self.weights.last()?))
    }

    /// The most recent `n` samples (fewer if not available).
    pub fn tail(&self, n: usize) -> (&[f64], &[f64]) {
        let start = self.len().saturating_sub(n);
        (&self.times[start..], &self.weights[start..])
    }
}
