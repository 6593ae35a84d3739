//! Rolling Window of recent observations

use crate::features::FeatureVector;
use std::collections::VecDeque;

/// Default number of observations retained
pub const DEFAULT_WINDOW: usize = 500;

/// Bounded FIFO of the most recent feature vectors.
///
/// Eviction is strictly by age. Not synchronized; see
/// [`MonitorState`](crate::inference::MonitorState) for the shared wrapper.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: VecDeque<FeatureVector>,
    capacity: usize,
    n_features: usize,
}

impl RollingWindow {
    /// Create an empty window. A zero capacity is clamped to one.
    pub fn new(n_features: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            n_features,
        }
    }

    /// Append every row in order, dropping the oldest once full
    pub fn update(&mut self, batch: &[FeatureVector]) {
        for row in batch {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
            }
            self.buf.push_back(row.clone());
        }
    }

    /// Column-wise arithmetic mean, or zeros when nothing is buffered.
    ///
    /// Kept as a running mean so that rows near `f64::MAX` cannot overflow
    /// an intermediate sum.
    pub fn mean(&self) -> FeatureVector {
        let mut means = vec![0.0; self.n_features];
        for (seen, row) in self.buf.iter().enumerate() {
            let k = (seen + 1) as f64;
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value / k - *mean / k;
            }
        }
        means
    }

    /// Number of buffered rows
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been observed yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum number of rows retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arity of the buffered rows
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Buffered rows, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &FeatureVector> {
        self.buf.iter()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(crate::features::N_FEATURES, DEFAULT_WINDOW)
    }
}
