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
//! System contract
//!
//! Systems contain the per-tick game logic that operates on shared entity and
//! component data. This module defines the capability trait the scheduler
//! consumes, plus [`SystemCore`], a small base struct that supplies identity,
//! dependencies, lifecycle state and statistics so implementors only need to
//! write their update body.

use crate::ecs::statistics::SystemStatistics;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error type returned by system bodies
pub type SystemError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by system bodies
pub type SystemResult = Result<(), SystemError>;

/// Stable opaque identifier of a registered system
///
/// Dependencies are declared by id and resolved against the registry when the
/// dependency graph is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(u64);

impl SystemId {
    /// Create a system id from a raw value
    pub const fn new(raw: u64) -> Self {
        SystemId(raw)
    }

    /// Get the raw id value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Incrementing id source
///
/// Each scheduler owns its own generator, so independent schedulers (for
/// example in tests) never hand out colliding ids.
#[derive(Debug)]
pub struct SystemIdGenerator {
    next: AtomicU64,
}

impl SystemIdGenerator {
    /// Create a generator starting at id 1
    pub fn new() -> Self {
        SystemIdGenerator {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> SystemId {
        SystemId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SystemIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemState {
    /// Constructed but not yet initialized
    Created,
    /// `initialize` completed
    Initialized,
    /// Eligible for scheduling
    Running,
    /// Temporarily excluded from scheduling
    Paused,
    /// Torn down; never runs again
    Destroyed,
}

/// Conventional priority values
///
/// Priority only breaks ties between systems of the same execution level;
/// lower values run first. It never overrides declared dependencies.
pub struct Priority;

impl Priority {
    /// Runs first within its level
    pub const HIGHEST: i32 = 0;
    /// High priority
    pub const HIGH: i32 = 100;
    /// Default priority
    pub const NORMAL: i32 = 500;
    /// Low priority
    pub const LOW: i32 = 800;
    /// Runs last within its level
    pub const LOWEST: i32 = 1000;
}

/// Shared state every system carries
///
/// Embed this in a system type and return it from [`System::core`] and
/// [`System::core_mut`]; the trait's default methods do the rest.
///
/// # Examples
///
/// ```
/// use system_scheduler::ecs::{System, SystemCore, SystemIdGenerator, SystemResult};
///
/// struct Movement {
///     core: SystemCore,
/// }
///
/// impl System for Movement {
///     fn core(&self) -> &SystemCore { &self.core }
///     fn core_mut(&mut self) -> &mut SystemCore { &mut self.core }
///     fn update(&mut self, _delta_time: f32) -> SystemResult { Ok(()) }
/// }
///
/// let ids = SystemIdGenerator::new();
/// let movement = Movement { core: SystemCore::new(ids.next_id(), "movement") };
/// assert_eq!(movement.name(), "movement");
/// ```
#[derive(Debug)]
pub struct SystemCore {
    id: SystemId,
    name: String,
    priority: i32,
    dependencies: BTreeSet<SystemId>,
    enabled: bool,
    state: SystemState,
    statistics: Arc<SystemStatistics>,
}

impl SystemCore {
    /// Create a core with normal priority and no dependencies
    pub fn new(id: SystemId, name: impl Into<String>) -> Self {
        SystemCore {
            id,
            name: name.into(),
            priority: Priority::NORMAL,
            dependencies: BTreeSet::new(),
            enabled: true,
            state: SystemState::Created,
            statistics: Arc::new(SystemStatistics::new()),
        }
    }

    /// Set the tie-break priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare a dependency that must complete before this system runs
    pub fn with_dependency(mut self, dependency: SystemId) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    /// Declare several dependencies at once
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = SystemId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    /// Add a dependency after construction
    ///
    /// Takes effect on the next graph rebuild.
    pub fn add_dependency(&mut self, dependency: SystemId) {
        self.dependencies.insert(dependency);
    }

    /// Get the system id
    pub fn id(&self) -> SystemId {
        self.id
    }

    /// Get the display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the tie-break priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Get the declared dependency ids
    pub fn dependencies(&self) -> &BTreeSet<SystemId> {
        &self.dependencies
    }

    /// Check the enabled flag
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the enabled flag
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        tracing::debug!(system = %self.name, enabled, "system enabled flag changed");
    }

    /// Get the lifecycle state
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// Move a running system to `Paused`
    ///
    /// Returns false if the system was not running.
    pub fn pause(&mut self) -> bool {
        if self.state == SystemState::Running {
            self.state = SystemState::Paused;
            tracing::debug!(system = %self.name, "system paused");
            true
        } else {
            false
        }
    }

    /// Move a paused system back to `Running`
    ///
    /// Returns false if the system was not paused.
    pub fn resume(&mut self) -> bool {
        if self.state == SystemState::Paused {
            self.state = SystemState::Running;
            tracing::debug!(system = %self.name, "system resumed");
            true
        } else {
            false
        }
    }

    /// Get the execution statistics handle
    pub fn statistics(&self) -> &Arc<SystemStatistics> {
        &self.statistics
    }

    pub(crate) fn set_state(&mut self, state: SystemState) {
        self.state = state;
    }
}

/// Capability trait for schedulable systems
///
/// `W` is the world type handed to [`System::initialize`]. The scheduler
/// passes it through untouched and never inspects it.
///
/// Only [`System::core`], [`System::core_mut`] and [`System::update`] are
/// required. Systems must not block waiting on other systems of the same
/// tick: a blocked system stalls its whole execution level.
pub trait System<W = ()>: Send {
    /// Access the embedded base state
    fn core(&self) -> &SystemCore;

    /// Mutable access to the embedded base state
    fn core_mut(&mut self) -> &mut SystemCore;

    /// Run one tick of game logic
    ///
    /// Errors are logged and counted by the scheduler; they never abort the
    /// tick.
    fn update(&mut self, delta_time: f32) -> SystemResult;

    /// One-time setup before the first update
    fn initialize(&mut self, _world: &W) -> SystemResult {
        Ok(())
    }

    /// Teardown hook, called on unregistration or shutdown
    fn destroy(&mut self) {}

    /// Decide whether to run this tick
    ///
    /// Defaults to the enabled flag. Interval-style systems override this.
    fn should_update(&self, _delta_time: f32) -> bool {
        self.is_enabled()
    }

    /// Get the system id
    fn id(&self) -> SystemId {
        self.core().id()
    }

    /// Get the display name
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Get the tie-break priority
    fn priority(&self) -> i32 {
        self.core().priority()
    }

    /// Get the ids this system depends on
    fn dependencies(&self) -> &BTreeSet<SystemId> {
        self.core().dependencies()
    }

    /// Check the enabled flag
    fn is_enabled(&self) -> bool {
        self.core().is_enabled()
    }

    /// Set the enabled flag
    fn set_enabled(&mut self, enabled: bool) {
        self.core_mut().set_enabled(enabled);
    }

    /// Get the lifecycle state
    fn state(&self) -> SystemState {
        self.core().state()
    }

    /// Get the accumulated execution statistics
    fn statistics(&self) -> &Arc<SystemStatistics> {
        self.core().statistics()
    }
}
