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
//! Batch processing counters

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Aggregate counters for a [`BatchProcessor`](super::BatchProcessor)
#[derive(Debug, Default)]
pub struct BatchStatistics {
    total_batches: AtomicU64,
    total_items: AtomicU64,
    total_nanos: AtomicU64,
    vectorized_operations: AtomicU64,
    operation_counts: DashMap<String, u64>,
}

impl BatchStatistics {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed call
    pub fn record_batch(&self, items: usize, elapsed: Duration, vectorized: bool) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_items.fetch_add(items as u64, Ordering::Relaxed);
        self.total_nanos.fetch_add(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if vectorized {
            self.vectorized_operations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one call of a named operation
    pub fn record_operation(&self, operation: &str) {
        match self.operation_counts.get_mut(operation) {
            Some(mut count) => *count += 1,
            None => {
                *self
                    .operation_counts
                    .entry(operation.to_string())
                    .or_insert(0) += 1;
            }
        }
    }

    /// Number of recorded calls
    pub fn total_batches(&self) -> u64 {
        self.total_batches.load(Ordering::Relaxed)
    }

    /// Number of items processed
    pub fn total_items(&self) -> u64 {
        self.total_items.load(Ordering::Relaxed)
    }

    /// Wall time spent processing
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    /// Number of vectorized calls
    pub fn vectorized_operations(&self) -> u64 {
        self.vectorized_operations.load(Ordering::Relaxed)
    }

    /// Calls per operation name
    pub fn operation_counts(&self) -> HashMap<String, u64> {
        self.operation_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Mean items per call
    pub fn average_items_per_batch(&self) -> f64 {
        match self.total_batches() {
            0 => 0.0,
            batches => self.total_items() as f64 / batches as f64,
        }
    }

    /// Mean wall time per call
    pub fn average_time_per_batch(&self) -> Duration {
        match self.total_batches() {
            0 => Duration::ZERO,
            batches => Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed) / batches),
        }
    }

    /// Items per second over the processor's lifetime
    pub fn throughput(&self) -> f64 {
        let seconds = self.total_time().as_secs_f64();
        if seconds > 0.0 {
            self.total_items() as f64 / seconds
        } else {
            0.0
        }
    }

    /// Fraction of calls that were vectorized
    pub fn vectorization_rate(&self) -> f64 {
        match self.total_batches() {
            0 => 0.0,
            batches => self.vectorized_operations() as f64 / batches as f64,
        }
    }
}
