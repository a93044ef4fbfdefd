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
//! Error types for the scheduler
//!
//! Only graph construction failures are surfaced to the tick driver. Faults
//! raised by individual systems are absorbed by the scheduler and exposed
//! through statistics instead.

use crate::ecs::SystemId;
use thiserror::Error;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The declared dependencies contain a cycle
    #[error("cyclic dependency detected involving system '{name}' ({id})")]
    CyclicDependency {
        /// System on which the back-edge was found
        id: SystemId,
        /// Display name of that system
        name: String,
    },

    /// No system is registered under the given id
    #[error("system {0} is not registered")]
    SystemNotFound(SystemId),

    /// A lifecycle transition was requested from the wrong state
    #[error("system '{name}' cannot {action} while {state:?}")]
    InvalidState {
        /// Display name of the system
        name: String,
        /// The attempted transition
        action: &'static str,
        /// State the system was in
        state: crate::ecs::SystemState,
    },

    /// The worker pool could not be created
    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
