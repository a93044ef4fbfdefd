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
//! Scheduler configuration
//!
//! [`ScheduleConfig`] is the whole externally tunable surface of the
//! scheduler. Out-of-range values are clamped rather than rejected so the
//! engine is always schedulable.
//!
//! # Environment Configuration
//!
//! [`ScheduleConfig::from_env`] applies optional overrides:
//! ```bash
//! export ECS_SCHEDULER_STRATEGY=dynamic_load_balance
//! export ECS_SCHEDULER_MAX_THREADS=8
//! export ECS_SCHEDULER_PROFILING=true
//! ```

use crate::ecs::statistics::{DEFAULT_ADAPTIVE_WINDOW, MIN_ADAPTIVE_WINDOW};
use crate::executor::available_threads;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable selecting the strategy
pub const ENV_STRATEGY: &str = "ECS_SCHEDULER_STRATEGY";
/// Environment variable selecting the worker count
pub const ENV_MAX_THREADS: &str = "ECS_SCHEDULER_MAX_THREADS";
/// Environment variable toggling per-system profiling
pub const ENV_PROFILING: &str = "ECS_SCHEDULER_PROFILING";

/// Default soft per-tick budget (one 60 Hz frame)
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_millis(16);

/// Execution strategy for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScheduleStrategy {
    /// Every system on the calling thread, level by level
    Sequential,
    /// Levels in order, systems of a level fanned out with a barrier
    #[default]
    SimpleParallel,
    /// Currently behaves like `SimpleParallel`
    PipelineParallel,
    /// Cost-sorted systems packed onto worker buckets
    DynamicLoadBalance,
    /// Currently behaves like `SimpleParallel`
    Adaptive,
}

impl ScheduleStrategy {
    /// All strategies, in declaration order
    pub const ALL: [ScheduleStrategy; 5] = [
        ScheduleStrategy::Sequential,
        ScheduleStrategy::SimpleParallel,
        ScheduleStrategy::PipelineParallel,
        ScheduleStrategy::DynamicLoadBalance,
        ScheduleStrategy::Adaptive,
    ];

    /// Canonical snake_case name
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStrategy::Sequential => "sequential",
            ScheduleStrategy::SimpleParallel => "simple_parallel",
            ScheduleStrategy::PipelineParallel => "pipeline_parallel",
            ScheduleStrategy::DynamicLoadBalance => "dynamic_load_balance",
            ScheduleStrategy::Adaptive => "adaptive",
        }
    }

    /// Whether level k+1 never starts before level k has finished
    pub fn has_level_barriers(self) -> bool {
        !matches!(self, ScheduleStrategy::DynamicLoadBalance)
    }
}

impl fmt::Display for ScheduleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ScheduleStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("unknown schedule strategy '{}'", s))
    }
}

/// Immutable scheduler configuration
///
/// Built once and swapped wholesale via
/// [`Scheduler::set_config`](crate::ecs::Scheduler::set_config).
///
/// # Examples
///
/// ```
/// use system_scheduler::ecs::{ScheduleConfig, ScheduleStrategy};
///
/// let config = ScheduleConfig::new(ScheduleStrategy::Sequential)
///     .with_max_threads(0)
///     .with_profiling(true);
/// assert_eq!(config.max_threads(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    strategy: ScheduleStrategy,
    max_threads: usize,
    max_execution_time: Duration,
    profiling: bool,
    load_balancing: bool,
    load_balancing_threshold: f32,
    adaptive_window_size: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            strategy: ScheduleStrategy::default(),
            max_threads: available_threads(),
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            profiling: false,
            load_balancing: true,
            load_balancing_threshold: 0.8,
            adaptive_window_size: DEFAULT_ADAPTIVE_WINDOW,
        }
    }
}

impl ScheduleConfig {
    /// Create a default configuration using `strategy`
    pub fn new(strategy: ScheduleStrategy) -> Self {
        ScheduleConfig {
            strategy,
            ..Self::default()
        }
    }

    /// Default configuration with environment overrides applied
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_STRATEGY) {
            match value.parse() {
                Ok(strategy) => self.strategy = strategy,
                Err(e) => tracing::warn!(key = ENV_STRATEGY, error = %e, "ignoring override"),
            }
        }
        if let Some(value) = lookup(ENV_MAX_THREADS) {
            match value.trim().parse::<usize>() {
                Ok(threads) => self = self.with_max_threads(threads),
                Err(e) => tracing::warn!(key = ENV_MAX_THREADS, error = %e, "ignoring override"),
            }
        }
        if let Some(value) = lookup(ENV_PROFILING) {
            match value.trim().parse::<bool>() {
                Ok(profiling) => self.profiling = profiling,
                Err(e) => tracing::warn!(key = ENV_PROFILING, error = %e, "ignoring override"),
            }
        }
        self
    }

    /// Set the strategy
    pub fn with_strategy(mut self, strategy: ScheduleStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the worker count, clamped to at least 1
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads.max(1);
        self
    }

    /// Set the soft per-tick budget
    pub fn with_max_execution_time(mut self, budget: Duration) -> Self {
        self.max_execution_time = budget;
        self
    }

    /// Toggle per-system timing in the schedule statistics
    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    /// Toggle cost-based bucket assignment
    pub fn with_load_balancing(mut self, enabled: bool) -> Self {
        self.load_balancing = enabled;
        self
    }

    /// Set the utilization below which an imbalance is reported
    ///
    /// Clamped to `[0.1, 1.0]`; NaN falls back to the default.
    pub fn with_load_balancing_threshold(mut self, threshold: f32) -> Self {
        self.load_balancing_threshold = if threshold.is_nan() {
            0.8
        } else {
            threshold.clamp(0.1, 1.0)
        };
        self
    }

    /// Set the trailing window, clamped to at least 10 samples
    pub fn with_adaptive_window_size(mut self, samples: usize) -> Self {
        self.adaptive_window_size = samples.max(MIN_ADAPTIVE_WINDOW);
        self
    }

    /// Configured strategy
    pub fn strategy(&self) -> ScheduleStrategy {
        self.strategy
    }

    /// Worker count
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Soft per-tick budget
    pub fn max_execution_time(&self) -> Duration {
        self.max_execution_time
    }

    /// Whether per-system profiling is on
    pub fn profiling(&self) -> bool {
        self.profiling
    }

    /// Whether cost-based bucket assignment is on
    pub fn load_balancing(&self) -> bool {
        self.load_balancing
    }

    /// Imbalance reporting threshold
    pub fn load_balancing_threshold(&self) -> f32 {
        self.load_balancing_threshold
    }

    /// Trailing window size
    pub fn adaptive_window_size(&self) -> usize {
        self.adaptive_window_size
    }
}
