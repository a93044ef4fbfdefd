// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Adaptive batch-size controller
//!
//! A hysteresis heuristic, not a control loop: three strictly rising
//! throughput samples grow the batch by one step, three strictly falling ones
//! shrink it by one step, anything else leaves it alone.

use super::{BATCH_SIZE_STEP, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of throughput samples kept
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Tracks recent throughput and nudges the batch size
#[derive(Debug)]
pub struct AdaptiveBatchSizeController {
    current: AtomicUsize,
    min_size: usize,
    max_size: usize,
    step: usize,
    history: Mutex<VecDeque<f64>>,
    history_size: usize,
}

impl AdaptiveBatchSizeController {
    /// Create a controller with the crate-wide bounds and step
    pub fn new(initial_size: usize) -> Self {
        Self::with_bounds(initial_size, MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }

    /// Create a controller with custom bounds
    ///
    /// `min_size` is raised to at least 1 and `max_size` to at least
    /// `min_size`; the initial size is clamped into the range.
    pub fn with_bounds(initial_size: usize, min_size: usize, max_size: usize) -> Self {
        let min_size = min_size.max(1);
        let max_size = max_size.max(min_size);
        AdaptiveBatchSizeController {
            current: AtomicUsize::new(initial_size.clamp(min_size, max_size)),
            min_size,
            max_size,
            step: BATCH_SIZE_STEP,
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY_SIZE)),
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }

    /// Batch size to use for the next call
    pub fn current_batch_size(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Smallest size the controller will hand out
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Largest size the controller will hand out
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Feed one throughput sample, in items per second
    ///
    /// Non-finite samples are ignored.
    pub fn record_performance(&self, throughput: f64) {
        if !throughput.is_finite() {
            return;
        }

        let mut history = self.history.lock();
        history.push_back(throughput);
        while history.len() > self.history_size {
            history.pop_front();
        }
        if history.len() < 3 {
            return;
        }

        let n = history.len();
        let (a, b, c) = (history[n - 3], history[n - 2], history[n - 1]);
        let current = self.current_batch_size();
        let next = if c > b && b > a {
            (current + self.step).min(self.max_size)
        } else if c < b && b < a {
            current.saturating_sub(self.step).max(self.min_size)
        } else {
            current
        };

        if next != current {
            self.current.store(next, Ordering::Relaxed);
            tracing::trace!(from = current, to = next, "batch size adjusted");
        }
    }

    /// Drop all samples and restart from `size`
    pub fn reset(&self, size: usize) {
        let mut history = self.history.lock();
        history.clear();
        self.current
            .store(size.clamp(self.min_size, self.max_size), Ordering::Relaxed);
    }

    /// Number of samples currently held
    pub fn sample_count(&self) -> usize {
        self.history.lock().len()
    }
}

impl Default for AdaptiveBatchSizeController {
    fn default() -> Self {
        Self::new(super::DEFAULT_BATCH_SIZE)
    }
}
