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
//! Chunked batch processor
//!
//! Inputs shorter than the parallel threshold are processed inline, chunk by
//! chunk. Longer inputs have their chunks submitted to the worker pool and
//! joined before the call returns. Map, filter and reduce keep the results
//! of a sequential pass over the same input.

use super::{AdaptiveBatchSizeController, BatchConfig, BatchStatistics};
use crate::error::SchedulerResult;
use crate::executor::WorkerPool;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

const OP_DEFAULT: &str = "default";
const OP_VECTORIZED: &str = "vectorized";
const OP_MAP: &str = "map";
const OP_FILTER: &str = "filter";
const OP_REDUCE: &str = "reduce";

/// Elements touched by the prefetch pass, and the stride between them
const PREFETCH_SPAN: usize = 64;
const PREFETCH_STRIDE: usize = 8;

/// Batch processor sharing the scheduler's worker pool
///
/// # Examples
///
/// ```
/// use system_scheduler::batch::{BatchConfig, BatchProcessor};
///
/// let processor = BatchProcessor::new(BatchConfig::default()).unwrap();
/// let squares = processor.map_batch(&[1, 2, 3, 4], |x| x * x);
/// assert_eq!(squares, vec![1, 4, 9, 16]);
///
/// let total = processor.reduce_batch(&[1, 2, 3, 4], 0, |x| *x, |a, b| a + b);
/// assert_eq!(total, 10);
/// ```
pub struct BatchProcessor {
    pool: Arc<WorkerPool>,
    config: RwLock<BatchConfig>,
    controller: AdaptiveBatchSizeController,
    statistics: Arc<BatchStatistics>,
}

impl BatchProcessor {
    /// Create a processor with its own pool of `config.max_threads` workers
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::PoolBuild`](crate::error::SchedulerError::PoolBuild)
    /// if the pool cannot be created.
    pub fn new(config: BatchConfig) -> SchedulerResult<Self> {
        let pool = Arc::new(WorkerPool::new(config.max_threads)?);
        Ok(Self::with_pool(config, pool))
    }

    /// Create a processor on a shared pool
    pub fn with_pool(config: BatchConfig, pool: Arc<WorkerPool>) -> Self {
        BatchProcessor {
            controller: AdaptiveBatchSizeController::new(config.batch_size),
            config: RwLock::new(config),
            pool,
            statistics: Arc::new(BatchStatistics::new()),
        }
    }

    /// Process `items` in chunks, recorded under the `default` operation
    ///
    /// # Panics
    ///
    /// A panic in `task` propagates to the caller once all chunks are done.
    pub fn process_batch<T, F>(&self, items: &[T], task: F)
    where
        T: Sync,
        F: Fn(&[T]) + Sync,
    {
        self.process_batch_as(OP_DEFAULT, items, task);
    }

    /// Process `items` in chunks, recorded under `operation`
    pub fn process_batch_as<T, F>(&self, operation: &str, items: &[T], task: F)
    where
        T: Sync,
        F: Fn(&[T]) + Sync,
    {
        self.run_chunks(operation, items, |_, chunk| task(chunk));
    }

    /// Apply `task` to contiguous batch-sized ranges of `items`
    ///
    /// `task` receives each range and the index of its first element. With
    /// vectorization disabled, the whole slice is one range and the call is
    /// still counted in the statistics as a non-vectorized batch.
    pub fn process_vectorized<T, F>(&self, items: &mut [T], task: F)
    where
        F: FnMut(&mut [T], usize),
    {
        self.process_vectorized_as(OP_VECTORIZED, items, task);
    }

    /// Vectorized processing recorded under `operation`
    pub fn process_vectorized_as<T, F>(&self, operation: &str, items: &mut [T], mut task: F)
    where
        F: FnMut(&mut [T], usize),
    {
        if items.is_empty() {
            return;
        }
        let (vectorize, prefetch) = {
            let config = self.config.read();
            (config.enable_vectorization, config.enable_prefetch)
        };

        let start = Instant::now();
        if vectorize {
            if prefetch {
                prefetch_prefix(items);
            }
            let batch_size = self.current_batch_size();
            for (index, range) in items.chunks_mut(batch_size).enumerate() {
                task(range, index * batch_size);
            }
        } else {
            task(items, 0);
        }
        self.record(operation, items.len(), start.elapsed(), vectorize);
    }

    /// Map every item, preserving input order
    pub fn map_batch<T, R, F>(&self, items: &[T], mapper: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        let parts = self.collect_chunks(OP_MAP, items, |chunk| {
            chunk.iter().map(&mapper).collect::<Vec<R>>()
        });
        parts.into_iter().flatten().collect()
    }

    /// Keep items matching `predicate`, preserving input order
    pub fn filter_batch<T, F>(&self, items: &[T], predicate: F) -> Vec<T>
    where
        T: Sync + Send + Clone,
        F: Fn(&T) -> bool + Sync,
    {
        let parts = self.collect_chunks(OP_FILTER, items, |chunk| {
            chunk
                .iter()
                .filter(|item| predicate(item))
                .cloned()
                .collect::<Vec<T>>()
        });
        parts.into_iter().flatten().collect()
    }

    /// Map and fold every item
    ///
    /// Each chunk folds from a clone of `identity`, then the partial results
    /// are folded in input order. `combine` must be associative and
    /// `identity` must be its neutral element for the result to match a
    /// sequential fold.
    pub fn reduce_batch<T, R, M, C>(&self, items: &[T], identity: R, mapper: M, combine: C) -> R
    where
        T: Sync,
        R: Clone + Send + Sync,
        M: Fn(&T) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
    {
        let parts = self.collect_chunks(OP_REDUCE, items, |chunk| {
            chunk
                .iter()
                .fold(identity.clone(), |acc, item| combine(acc, mapper(item)))
        });
        parts.into_iter().fold(identity, &combine)
    }

    /// Run `per_chunk` over every chunk and return its outputs in chunk order
    fn collect_chunks<T, P, F>(&self, operation: &str, items: &[T], per_chunk: F) -> Vec<P>
    where
        T: Sync,
        P: Send,
        F: Fn(&[T]) -> P + Sync,
    {
        let parts = Mutex::new(Vec::new());
        self.run_chunks(operation, items, |index, chunk| {
            let part = per_chunk(chunk);
            parts.lock().push((index, part));
        });
        let mut parts = parts.into_inner();
        parts.sort_unstable_by_key(|(index, _)| *index);
        parts.into_iter().map(|(_, part)| part).collect()
    }

    fn run_chunks<T, F>(&self, operation: &str, items: &[T], task: F)
    where
        T: Sync,
        F: Fn(usize, &[T]) + Sync,
    {
        if items.is_empty() {
            return;
        }
        let (threshold, adaptive) = {
            let config = self.config.read();
            (config.parallel_threshold, config.adaptive_batch_size)
        };
        let batch_size = self.current_batch_size();

        let start = Instant::now();
        if items.len() >= threshold {
            let task = &task;
            let tasks: Vec<_> = items
                .chunks(batch_size)
                .enumerate()
                .map(|(index, chunk)| move || task(index, chunk))
                .collect();
            self.pool.join_all(tasks);
        } else {
            for (index, chunk) in items.chunks(batch_size).enumerate() {
                task(index, chunk);
            }
        }
        let elapsed = start.elapsed();

        self.record(operation, items.len(), elapsed, false);
        if adaptive && !elapsed.is_zero() {
            self.controller
                .record_performance(items.len() as f64 / elapsed.as_secs_f64());
        }
    }

    fn record(&self, operation: &str, items: usize, elapsed: Duration, vectorized: bool) {
        self.statistics.record_batch(items, elapsed, vectorized);
        self.statistics.record_operation(operation);
    }

    /// Batch size for the next call
    ///
    /// The controller's value when adaptive sizing is on, the configured
    /// size otherwise.
    pub fn current_batch_size(&self) -> usize {
        let config = self.config.read();
        if config.adaptive_batch_size {
            self.controller.current_batch_size()
        } else {
            config.clamped_batch_size()
        }
    }

    /// Replace the configuration
    ///
    /// A changed batch size reseeds the controller. The pool keeps its size.
    pub fn update_config(&self, config: BatchConfig) {
        let mut current = self.config.write();
        if current.batch_size != config.batch_size {
            self.controller.reset(config.batch_size);
        }
        tracing::info!(
            batch_size = config.batch_size,
            parallel_threshold = config.parallel_threshold,
            max_threads = config.max_threads,
            "batch config updated"
        );
        *current = config;
    }

    /// Snapshot of the configuration
    pub fn config(&self) -> BatchConfig {
        self.config.read().clone()
    }

    /// Aggregate counters
    pub fn statistics(&self) -> &Arc<BatchStatistics> {
        &self.statistics
    }

    /// The adaptive controller
    pub fn controller(&self) -> &AdaptiveBatchSizeController {
        &self.controller
    }

    /// Drain the worker pool
    ///
    /// Later calls still work but run inline. If the pool is shared, this also
    /// affects the scheduler.
    pub fn shutdown(&self) -> bool {
        self.pool.shutdown_default()
    }
}

/// Best-effort cache warm-up over a short prefix
fn prefetch_prefix<T>(items: &[T]) {
    for item in items.iter().take(PREFETCH_SPAN).step_by(PREFETCH_STRIDE) {
        std::hint::black_box(item);
    }
}
