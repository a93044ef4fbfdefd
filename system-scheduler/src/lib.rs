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
//! # System Scheduler
//!
//! Concurrent system scheduling for an ECS game server tick.
//!
//! ## Features
//!
//! - **Dependency graph**: systems declare dependencies by id; cycles are
//!   rejected and every system gets a topological execution level
//! - **Strategies**: sequential, level-parallel with barriers, and
//!   cost-based load balancing across worker buckets
//! - **Fault isolation**: a failing or panicking system never aborts a tick
//! - **Batch processing**: chunked map/filter/reduce over entity data with an
//!   adaptively tuned batch size
//! - **Parallelization**: optional Rayon worker pool (`parallel` feature)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use system_scheduler::batch::{BatchConfig, BatchProcessor};
//! use system_scheduler::ecs::{ScheduleConfig, Scheduler, System, SystemCore, SystemResult};
//! use system_scheduler::executor::WorkerPool;
//!
//! struct Movement {
//!     core: SystemCore,
//!     batch: Arc<BatchProcessor>,
//!     positions: Vec<f32>,
//! }
//!
//! impl System for Movement {
//!     fn core(&self) -> &SystemCore { &self.core }
//!     fn core_mut(&mut self) -> &mut SystemCore { &mut self.core }
//!     fn update(&mut self, delta_time: f32) -> SystemResult {
//!         self.batch.process_vectorized(&mut self.positions, |range, _| {
//!             for p in range.iter_mut() {
//!                 *p += delta_time;
//!             }
//!         });
//!         Ok(())
//!     }
//! }
//!
//! let pool = Arc::new(WorkerPool::new(2).unwrap());
//! let batch = Arc::new(BatchProcessor::with_pool(BatchConfig::default(), Arc::clone(&pool)));
//! let mut scheduler = Scheduler::with_pool(ScheduleConfig::default(), pool);
//!
//! let id = scheduler.next_system_id();
//! scheduler.register(Movement {
//!     core: SystemCore::new(id, "movement"),
//!     batch,
//!     positions: vec![0.0; 100],
//! });
//! scheduler.initialize(&());
//! scheduler.schedule(0.5).unwrap();
//! ```

#![warn(missing_docs)]

/// Bulk data-parallel processing
pub mod batch;

/// Error types
pub mod error;

/// System contract, dependency graph and scheduler
pub mod ecs;

/// Shared worker pool
pub mod executor;

pub use batch::{BatchConfig, BatchProcessor};
pub use ecs::{ScheduleConfig, ScheduleStrategy, Scheduler, System, SystemCore, SystemId};
pub use error::{SchedulerError, SchedulerResult};
pub use executor::WorkerPool;
