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
//! Shared worker pool
//!
//! One bounded pool of worker threads is shared by the scheduler and the batch
//! processor. With the `parallel` feature the pool is a Rayon thread pool;
//! without it every task runs inline on the calling thread, in submission
//! order.
//!
//! The submission queue is unbounded. Callers always join what they submit
//! before returning, so at most one level, one tick's buckets or one batch
//! call is in flight per caller.

use crate::error::SchedulerResult;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Grace period used by [`WorkerPool::shutdown_default`]
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bounded pool of worker threads
///
/// # Examples
///
/// ```
/// use system_scheduler::executor::WorkerPool;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let pool = WorkerPool::new(2).unwrap();
/// let counter = AtomicUsize::new(0);
/// let counter = &counter;
/// let tasks: Vec<_> = (0..4)
///     .map(|_| move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })
///     .collect();
/// pool.join_all(tasks);
/// assert_eq!(counter.load(Ordering::SeqCst), 4);
/// ```
pub struct WorkerPool {
    #[cfg(feature = "parallel")]
    pool: ThreadPool,
    threads: usize,
    in_flight: Mutex<usize>,
    drained: Condvar,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with `threads` workers
    ///
    /// A thread count of zero is clamped to one.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::PoolBuild`](crate::error::SchedulerError::PoolBuild) if the worker threads cannot be
    /// spawned.
    pub fn new(threads: usize) -> SchedulerResult<Self> {
        let threads = threads.max(1);

        #[cfg(feature = "parallel")]
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("ecs-worker-{}", index))
            .build()
            .map_err(|e| crate::error::SchedulerError::PoolBuild(e.to_string()))?;

        tracing::debug!(threads, "worker pool started");

        Ok(WorkerPool {
            #[cfg(feature = "parallel")]
            pool,
            threads,
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a pool sized to the machine's available parallelism
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn with_available_parallelism() -> SchedulerResult<Self> {
        Self::new(available_threads())
    }

    /// Number of worker threads
    ///
    /// Always 1 when the `parallel` feature is disabled.
    pub fn thread_count(&self) -> usize {
        if cfg!(feature = "parallel") {
            self.threads
        } else {
            1
        }
    }

    /// Number of tasks currently running or queued
    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Whether [`WorkerPool::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run every task and block until all have returned
    ///
    /// Tasks may borrow from the caller's stack. After shutdown, tasks run
    /// inline on the calling thread so callers stay functional.
    ///
    /// # Panics
    ///
    /// A panic inside a task is re-raised here once all tasks have finished.
    pub fn join_all<'s, F>(&self, tasks: Vec<F>)
    where
        F: FnOnce() + Send + 's,
    {
        if tasks.is_empty() {
            return;
        }
        if self.is_shut_down() {
            self.run_inline(tasks);
        } else {
            self.run_parallel(tasks);
        }
    }

    #[cfg(feature = "parallel")]
    fn run_parallel<'s, F>(&self, tasks: Vec<F>)
    where
        F: FnOnce() + Send + 's,
    {
        self.pool.scope(|scope| {
            for task in tasks {
                let ticket = self.enter();
                scope.spawn(move |_| {
                    let _ticket = ticket;
                    task();
                });
            }
        });
    }

    #[cfg(not(feature = "parallel"))]
    fn run_parallel<'s, F>(&self, tasks: Vec<F>)
    where
        F: FnOnce() + Send + 's,
    {
        self.run_inline(tasks);
    }

    fn run_inline<F: FnOnce()>(&self, tasks: Vec<F>) {
        for task in tasks {
            let _ticket = self.enter();
            task();
        }
    }

    /// Stop accepting parallel work and wait for in-flight tasks to drain
    ///
    /// Returns true if everything drained within `grace`. Rayon workers cannot
    /// be killed, so on timeout the remaining tasks are abandoned to finish on
    /// their own and the threads exit when the pool is dropped.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        let deadline = Instant::now() + grace;

        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            if self.drained.wait_until(&mut in_flight, deadline).timed_out() {
                break;
            }
        }

        let drained = *in_flight == 0;
        if drained {
            tracing::info!("worker pool shut down");
        } else {
            tracing::warn!(remaining = *in_flight, "worker pool shutdown timed out");
        }
        drained
    }

    /// Shut down with [`DEFAULT_SHUTDOWN_GRACE`]
    pub fn shutdown_default(&self) -> bool {
        self.shutdown(DEFAULT_SHUTDOWN_GRACE)
    }

    fn enter(&self) -> Ticket<'_> {
        *self.in_flight.lock() += 1;
        Ticket { pool: self }
    }
}

/// Decrements the in-flight count when a task finishes or unwinds
struct Ticket<'a> {
    pool: &'a WorkerPool,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.pool.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.pool.drained.notify_all();
        }
    }
}

/// Threads the machine can run concurrently, at least 1
pub fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_zero_threads_clamped() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_join_all_runs_every_task() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = AtomicUsize::new(0);
        let shared = &counter;
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                move || {
                    shared.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();
        pool.join_all(tasks);

        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_join_all_empty() {
        let pool = WorkerPool::new(2).unwrap();
        pool.join_all(Vec::<fn()>::new());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_tasks_overlap_on_multiple_workers() {
        use std::sync::Barrier;

        // Both tasks must be live at once to pass the barrier
        let pool = WorkerPool::new(2).unwrap();
        let barrier = Barrier::new(2);
        let barrier = &barrier;
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                move || {
                    barrier.wait();
                }
            })
            .collect();
        pool.join_all(tasks);
    }

    #[test]
    fn test_shutdown_then_inline() {
        let pool = WorkerPool::new(2).unwrap();
        assert!(pool.shutdown(Duration::from_millis(10)));
        assert!(pool.is_shut_down());

        let counter = AtomicUsize::new(0);
        pool.join_all(vec![|| {
            counter.fetch_add(1, Ordering::SeqCst);
        }]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
