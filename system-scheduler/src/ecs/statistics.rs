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
//! Execution statistics
//!
//! Counters are additive atomics so worker threads can record concurrently
//! without locking. Readers may observe slightly stale aggregates, which is
//! fine for diagnostics and load-balancing estimates.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Default number of tick samples kept for trailing averages
pub const DEFAULT_ADAPTIVE_WINDOW: usize = 100;

/// Smallest accepted trailing window
pub const MIN_ADAPTIVE_WINDOW: usize = 10;

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Per-system execution counters
#[derive(Debug)]
pub struct SystemStatistics {
    update_count: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    error_count: AtomicU64,
}

impl SystemStatistics {
    /// Create empty statistics
    pub fn new() -> Self {
        SystemStatistics {
            update_count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Record one completed update
    pub fn record_update(&self, elapsed: Duration) {
        let nanos = duration_nanos(elapsed);
        self.update_count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Record one failed update or lifecycle call
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of updates executed
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }

    /// Number of recorded failures
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Total time spent in updates
    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    /// Shortest update, if any ran
    pub fn min_duration(&self) -> Option<Duration> {
        match self.min_nanos.load(Ordering::Relaxed) {
            u64::MAX => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Longest update
    pub fn max_duration(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }

    /// Mean update duration, `None` for systems that never ran
    pub fn average_duration(&self) -> Option<Duration> {
        let count = self.update_count();
        if count == 0 {
            None
        } else {
            Some(Duration::from_nanos(
                self.total_nanos.load(Ordering::Relaxed) / count,
            ))
        }
    }
}

impl Default for SystemStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate scheduler statistics
///
/// Written by the scheduler after every tick and every system execution;
/// polled read-only by diagnostics.
#[derive(Debug)]
pub struct ScheduleStatistics {
    total_schedule_nanos: AtomicU64,
    schedule_count: AtomicU64,
    parallel_level: AtomicUsize,
    max_parallel_level: AtomicUsize,
    system_execution_times: DashMap<String, Duration>,
    recent_ticks: Mutex<VecDeque<Duration>>,
    window: AtomicUsize,
}

impl ScheduleStatistics {
    /// Create empty statistics with the default trailing window
    pub fn new() -> Self {
        Self::with_window(DEFAULT_ADAPTIVE_WINDOW)
    }

    /// Create empty statistics keeping `window` recent tick durations
    ///
    /// The window is clamped to at least [`MIN_ADAPTIVE_WINDOW`].
    pub fn with_window(window: usize) -> Self {
        let window = window.max(MIN_ADAPTIVE_WINDOW);
        ScheduleStatistics {
            total_schedule_nanos: AtomicU64::new(0),
            schedule_count: AtomicU64::new(0),
            parallel_level: AtomicUsize::new(0),
            max_parallel_level: AtomicUsize::new(0),
            system_execution_times: DashMap::new(),
            recent_ticks: Mutex::new(VecDeque::with_capacity(window)),
            window: AtomicUsize::new(window),
        }
    }

    /// Record the duration of one `schedule` call
    pub fn record_schedule_time(&self, elapsed: Duration) {
        self.total_schedule_nanos
            .fetch_add(duration_nanos(elapsed), Ordering::Relaxed);
        self.schedule_count.fetch_add(1, Ordering::Relaxed);

        let window = self.window.load(Ordering::Relaxed);
        let mut recent = self.recent_ticks.lock();
        recent.push_back(elapsed);
        while recent.len() > window {
            recent.pop_front();
        }
    }

    /// Record the last observed execution time of a system
    pub fn record_system_time(&self, system_name: &str, elapsed: Duration) {
        match self.system_execution_times.get_mut(system_name) {
            Some(mut entry) => *entry = elapsed,
            None => {
                self.system_execution_times
                    .insert(system_name.to_string(), elapsed);
            }
        }
    }

    /// Record how many systems just ran concurrently
    pub fn update_parallel_level(&self, level: usize) {
        self.parallel_level.store(level, Ordering::Relaxed);
        self.max_parallel_level.fetch_max(level, Ordering::Relaxed);
    }

    /// Resize the trailing window, dropping the oldest samples if needed
    pub fn set_window(&self, window: usize) {
        let window = window.max(MIN_ADAPTIVE_WINDOW);
        self.window.store(window, Ordering::Relaxed);
        let mut recent = self.recent_ticks.lock();
        while recent.len() > window {
            recent.pop_front();
        }
    }

    /// Number of `schedule` calls recorded
    pub fn schedule_count(&self) -> u64 {
        self.schedule_count.load(Ordering::Relaxed)
    }

    /// Cumulative time spent in `schedule`
    pub fn total_schedule_time(&self) -> Duration {
        Duration::from_nanos(self.total_schedule_nanos.load(Ordering::Relaxed))
    }

    /// Mean `schedule` duration over the whole lifetime
    pub fn average_schedule_time(&self) -> Duration {
        let count = self.schedule_count();
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_schedule_nanos.load(Ordering::Relaxed) / count)
        }
    }

    /// Mean `schedule` duration over the trailing window
    pub fn recent_average_schedule_time(&self) -> Option<Duration> {
        let recent = self.recent_ticks.lock();
        if recent.is_empty() {
            return None;
        }
        let total: Duration = recent.iter().sum();
        Some(total / recent.len() as u32)
    }

    /// Parallelism observed on the most recent concurrent fan-out
    pub fn current_parallel_level(&self) -> usize {
        self.parallel_level.load(Ordering::Relaxed)
    }

    /// Highest parallelism ever observed
    pub fn max_parallel_level(&self) -> usize {
        self.max_parallel_level.load(Ordering::Relaxed)
    }

    /// Snapshot of last-observed execution time per system name
    pub fn system_execution_times(&self) -> HashMap<String, Duration> {
        self.system_execution_times
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl Default for ScheduleStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_system_statistics_empty() {
        let stats = SystemStatistics::new();
        assert_eq!(stats.update_count(), 0);
        assert_eq!(stats.average_duration(), None);
        assert_eq!(stats.min_duration(), None);
        assert_eq!(stats.max_duration(), Duration::ZERO);
    }

    #[test]
    fn test_system_statistics_min_max_average() {
        let stats = SystemStatistics::new();
        stats.record_update(Duration::from_micros(10));
        stats.record_update(Duration::from_micros(30));
        stats.record_update(Duration::from_micros(20));

        assert_eq!(stats.update_count(), 3);
        assert_eq!(stats.min_duration(), Some(Duration::from_micros(10)));
        assert_eq!(stats.max_duration(), Duration::from_micros(30));
        assert_eq!(stats.average_duration(), Some(Duration::from_micros(20)));
        assert_eq!(stats.total_duration(), Duration::from_micros(60));
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(SystemStatistics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..250 {
                        stats.record_update(Duration::from_nanos(100));
                        stats.record_error();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.update_count(), 1000);
        assert_eq!(stats.error_count(), 1000);
        assert_eq!(stats.total_duration(), Duration::from_nanos(100_000));
    }

    #[test]
    fn test_schedule_statistics_averages() {
        let stats = ScheduleStatistics::new();
        assert_eq!(stats.average_schedule_time(), Duration::ZERO);
        assert_eq!(stats.recent_average_schedule_time(), None);

        stats.record_schedule_time(Duration::from_millis(2));
        stats.record_schedule_time(Duration::from_millis(4));
        assert_eq!(stats.schedule_count(), 2);
        assert_eq!(stats.average_schedule_time(), Duration::from_millis(3));
        assert_eq!(stats.recent_average_schedule_time(), Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_window_is_clamped_and_bounded() {
        let stats = ScheduleStatistics::with_window(1);
        for ms in 0..20u64 {
            stats.record_schedule_time(Duration::from_millis(ms));
        }
        // Window clamps to 10: samples 10..20 remain, mean 14.5ms
        assert_eq!(
            stats.recent_average_schedule_time(),
            Some(Duration::from_micros(14_500))
        );
        assert_eq!(stats.schedule_count(), 20);
    }

    #[test]
    fn test_parallel_level_tracks_max() {
        let stats = ScheduleStatistics::new();
        stats.update_parallel_level(3);
        stats.update_parallel_level(2);
        assert_eq!(stats.current_parallel_level(), 2);
        assert_eq!(stats.max_parallel_level(), 3);
    }

    #[test]
    fn test_system_times_keep_last_value() {
        let stats = ScheduleStatistics::new();
        stats.record_system_time("physics", Duration::from_micros(5));
        stats.record_system_time("physics", Duration::from_micros(7));
        stats.record_system_time("ai", Duration::from_micros(1));

        let times = stats.system_execution_times();
        assert_eq!(times.len(), 2);
        assert_eq!(times["physics"], Duration::from_micros(7));
    }
}
