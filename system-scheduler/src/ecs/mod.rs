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
//! ECS system scheduling
//!
//! This module provides the system side of the ECS architecture:
//! - The [`System`] contract and its [`SystemCore`] base state
//! - Dependency graph construction with cycle detection and level assignment
//! - The tick [`Scheduler`] and its strategies
//! - Per-system and aggregate execution statistics

mod config;
mod graph;
mod scheduler;
mod statistics;
mod system;

pub use config::{
    ScheduleConfig, ScheduleStrategy, DEFAULT_MAX_EXECUTION_TIME, ENV_MAX_THREADS, ENV_PROFILING,
    ENV_STRATEGY,
};
pub use graph::{DependencyGraph, SystemNode};
pub use scheduler::{plan_buckets, Scheduler, TickReport};
pub use statistics::{
    ScheduleStatistics, SystemStatistics, DEFAULT_ADAPTIVE_WINDOW, MIN_ADAPTIVE_WINDOW,
};
pub use system::{
    Priority, System, SystemCore, SystemError, SystemId, SystemIdGenerator, SystemResult,
    SystemState,
};
