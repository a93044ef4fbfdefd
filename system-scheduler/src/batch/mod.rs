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
//! Bulk data-parallel processing
//!
//! Systems that touch many entities hand their slices to a [`BatchProcessor`],
//! which chunks them by an adaptively tuned batch size and fans large inputs
//! out to the shared worker pool.

mod controller;
mod processor;
mod statistics;

pub use controller::{AdaptiveBatchSizeController, DEFAULT_HISTORY_SIZE};
pub use processor::BatchProcessor;
pub use statistics::BatchStatistics;

use crate::executor::available_threads;

/// Initial batch size
pub const DEFAULT_BATCH_SIZE: usize = 1024;
/// Smallest batch size the controller will use
pub const MIN_BATCH_SIZE: usize = 64;
/// Largest batch size the controller will use
pub const MAX_BATCH_SIZE: usize = 8192;
/// Amount the controller moves the batch size per adjustment
pub const BATCH_SIZE_STEP: usize = 64;

/// Configuration for batch processing behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Batch size used when adaptive sizing is off, and the controller's seed
    pub batch_size: usize,
    /// Inputs at least this long are processed on the worker pool
    pub parallel_threshold: usize,
    /// Split vectorized calls into batch-sized ranges
    pub enable_vectorization: bool,
    /// Touch a prefix of the input before vectorized processing
    pub enable_prefetch: bool,
    /// Let the controller tune the batch size from measured throughput
    pub adaptive_batch_size: bool,
    /// Worker count for a processor that owns its pool
    pub max_threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_threshold: 1000,
            enable_vectorization: true,
            enable_prefetch: true,
            adaptive_batch_size: true,
            max_threads: available_threads(),
        }
    }
}

impl BatchConfig {
    /// Create a configuration with a fixed batch size and parallel threshold
    pub fn new(batch_size: usize, parallel_threshold: usize) -> Self {
        BatchConfig {
            batch_size,
            parallel_threshold,
            ..Self::default()
        }
    }

    /// Large batches and an oversubscribed pool for throughput-bound work
    pub fn high_performance() -> Self {
        BatchConfig {
            batch_size: MAX_BATCH_SIZE,
            parallel_threshold: 500,
            max_threads: available_threads() * 2,
            ..Self::default()
        }
    }

    /// Small inline batches with no adaptation
    pub fn low_latency() -> Self {
        BatchConfig {
            batch_size: MIN_BATCH_SIZE,
            parallel_threshold: 100,
            enable_vectorization: false,
            enable_prefetch: false,
            adaptive_batch_size: false,
            max_threads: 1,
        }
    }

    /// Enable or disable adaptive sizing
    pub fn with_adaptive(mut self, enabled: bool) -> Self {
        self.adaptive_batch_size = enabled;
        self
    }

    /// Enable or disable vectorized splitting
    pub fn with_vectorization(mut self, enabled: bool) -> Self {
        self.enable_vectorization = enabled;
        self
    }

    /// Enable or disable the prefetch pass
    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.enable_prefetch = enabled;
        self
    }

    /// Set the worker count, clamped to at least 1
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads.max(1);
        self
    }

    /// Batch size clamped to `[MIN_BATCH_SIZE, MAX_BATCH_SIZE]`
    pub fn clamped_batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }
}
