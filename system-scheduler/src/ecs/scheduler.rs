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
//! System scheduler with parallel execution support
//!
//! The scheduler drives one tick at a time. It keeps the dependency graph
//! current, then runs every system through one of five strategies:
//!
//! - **Sequential**: levels in order on the calling thread.
//! - **SimpleParallel**: levels in order; systems of a level fan out to the
//!   worker pool and the driver waits on a barrier before the next level.
//! - **PipelineParallel** and **Adaptive**: currently identical to
//!   SimpleParallel.
//! - **DynamicLoadBalance**: all systems flattened, sorted by historical cost
//!   and packed onto `max_threads` buckets with the longest-processing-time
//!   heuristic. Buckets run concurrently and there are no level barriers, so
//!   declared dependencies are honored only on a best-effort basis.
//!
//! A failing or panicking system is logged and counted; it never aborts the
//! tick or blocks its siblings.

use crate::ecs::config::{ScheduleConfig, ScheduleStrategy};
use crate::ecs::graph::{DependencyGraph, SystemNode};
use crate::ecs::statistics::{ScheduleStatistics, SystemStatistics};
use crate::ecs::system::{System, SystemCore, SystemId, SystemIdGenerator, SystemState};
use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::WorkerPool;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one `schedule` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Strategy that ran the tick
    pub strategy: ScheduleStrategy,
    /// Systems whose update was invoked, including failures
    pub executed: usize,
    /// Systems passed over (disabled, paused, declined, or guarded out)
    pub skipped: usize,
    /// Systems whose update returned an error or panicked, plus systems
    /// whose skip check panicked (those also count as skipped)
    pub failed: usize,
    /// Wall time of the tick
    pub elapsed: Duration,
}

/// Per-tick counters shared by the worker threads
struct TickContext<'a> {
    statistics: &'a ScheduleStatistics,
    profiling: bool,
    executed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl<'a> TickContext<'a> {
    fn new(statistics: &'a ScheduleStatistics, profiling: bool) -> Self {
        TickContext {
            statistics,
            profiling,
            executed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn into_report(self, strategy: ScheduleStrategy, elapsed: Duration) -> TickReport {
        TickReport {
            strategy,
            executed: self.executed.into_inner(),
            skipped: self.skipped.into_inner(),
            failed: self.failed.into_inner(),
            elapsed,
        }
    }
}

/// Dependency-aware system scheduler
///
/// # Examples
///
/// ```
/// use system_scheduler::ecs::{
///     ScheduleConfig, ScheduleStrategy, Scheduler, System, SystemCore, SystemResult,
/// };
///
/// struct Tick {
///     core: SystemCore,
///     ticks: u32,
/// }
///
/// impl System for Tick {
///     fn core(&self) -> &SystemCore { &self.core }
///     fn core_mut(&mut self) -> &mut SystemCore { &mut self.core }
///     fn update(&mut self, _delta_time: f32) -> SystemResult {
///         self.ticks += 1;
///         Ok(())
///     }
/// }
///
/// let mut scheduler = Scheduler::new(ScheduleConfig::new(ScheduleStrategy::Sequential)).unwrap();
/// let id = scheduler.next_system_id();
/// scheduler.register(Tick { core: SystemCore::new(id, "tick"), ticks: 0 });
/// scheduler.initialize(&());
///
/// let report = scheduler.schedule(1.0 / 60.0).unwrap();
/// assert_eq!(report.executed, 1);
/// ```
pub struct Scheduler<W = ()> {
    config: ScheduleConfig,
    graph: DependencyGraph<W>,
    pool: Arc<WorkerPool>,
    statistics: Arc<ScheduleStatistics>,
    ids: SystemIdGenerator,
}

impl<W> Scheduler<W> {
    /// Create a scheduler with its own worker pool of `config.max_threads()`
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::PoolBuild`] if the pool cannot be created.
    pub fn new(config: ScheduleConfig) -> SchedulerResult<Self> {
        let pool = Arc::new(WorkerPool::new(config.max_threads())?);
        Ok(Self::with_pool(config, pool))
    }

    /// Create a scheduler on a shared worker pool
    ///
    /// Pass the same pool to a
    /// [`BatchProcessor`](crate::batch::BatchProcessor) to avoid running two
    /// sets of worker threads.
    pub fn with_pool(config: ScheduleConfig, pool: Arc<WorkerPool>) -> Self {
        let statistics = Arc::new(ScheduleStatistics::with_window(
            config.adaptive_window_size(),
        ));
        Scheduler {
            config,
            graph: DependencyGraph::new(),
            pool,
            statistics,
            ids: SystemIdGenerator::new(),
        }
    }

    /// Allocate an id for a new system
    pub fn next_system_id(&self) -> SystemId {
        self.ids.next_id()
    }

    /// The id generator owned by this scheduler
    pub fn id_generator(&self) -> &SystemIdGenerator {
        &self.ids
    }

    /// Register a system
    ///
    /// Returns false, leaving the registry unchanged, if the id is already
    /// registered.
    pub fn register<S: System<W> + 'static>(&mut self, system: S) -> bool {
        self.graph.register(Box::new(system))
    }

    /// Register an already boxed system
    pub fn register_boxed(&mut self, system: Box<dyn System<W>>) -> bool {
        self.graph.register(system)
    }

    /// Unregister and destroy a system
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SystemNotFound`] for unknown ids.
    pub fn unregister(&mut self, id: SystemId) -> SchedulerResult<()> {
        let mut system = self
            .graph
            .unregister(id)
            .ok_or(SchedulerError::SystemNotFound(id))?;
        destroy_system(&mut *system);
        Ok(())
    }

    /// Initialize every system still in the `Created` state
    ///
    /// Successful systems move to `Running`. A failing initializer is logged
    /// and counted, and the system stays `Created` so a later call can retry.
    /// Returns the number of systems initialized.
    pub fn initialize(&mut self, world: &W) -> usize {
        let mut initialized = 0;
        for node in self.graph.nodes_mut() {
            let mut system = node.lock();
            if system.state() != SystemState::Created {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| system.initialize(world)));
            match flatten_outcome(outcome) {
                Ok(()) => {
                    system.core_mut().set_state(SystemState::Initialized);
                    system.core_mut().set_state(SystemState::Running);
                    initialized += 1;
                    tracing::debug!(system = %node.name(), "system initialized");
                }
                Err(message) => {
                    system.statistics().record_error();
                    tracing::error!(system = %node.name(), error = %message, "system failed to initialize");
                    drop(system);
                    node.set_last_error(message);
                }
            }
        }
        initialized
    }

    /// Rebuild the dependency graph if registrations changed
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::CyclicDependency`] on a cycle; the previous
    /// schedule stays in effect.
    pub fn build(&mut self) -> SchedulerResult<()> {
        self.graph.build()
    }

    /// Run one tick
    ///
    /// If the graph cannot be rebuilt because of a cycle, the tick still runs
    /// on the last valid graph and the cycle error is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::CyclicDependency`] while the registry
    /// contains a cycle.
    pub fn schedule(&mut self, delta_time: f32) -> SchedulerResult<TickReport> {
        let start = Instant::now();
        let built = self.graph.build();

        let strategy = self.config.strategy();
        let context = TickContext::new(&self.statistics, self.config.profiling());
        match strategy {
            ScheduleStrategy::Sequential => self.run_sequential(delta_time, &context),
            ScheduleStrategy::SimpleParallel => self.run_level_parallel(delta_time, &context),
            // Both are reserved extension points that currently share the
            // level-barrier behavior.
            ScheduleStrategy::PipelineParallel | ScheduleStrategy::Adaptive => {
                self.run_level_parallel(delta_time, &context)
            }
            ScheduleStrategy::DynamicLoadBalance => self.run_load_balanced(delta_time, &context),
        }

        let elapsed = start.elapsed();
        self.statistics.record_schedule_time(elapsed);
        if elapsed > self.config.max_execution_time() {
            tracing::warn!(
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = self.config.max_execution_time().as_micros() as u64,
                %strategy,
                "tick exceeded its time budget"
            );
        }

        let report = context.into_report(strategy, elapsed);
        built.map(|()| report)
    }

    fn run_sequential(&self, delta_time: f32, context: &TickContext<'_>) {
        for level in 0..self.graph.level_count() {
            for node in self.graph.level_nodes(level) {
                execute_node(node, delta_time, context);
            }
        }
    }

    fn run_level_parallel(&self, delta_time: f32, context: &TickContext<'_>) {
        for level in 0..self.graph.level_count() {
            let nodes = self.graph.level_nodes(level);
            match nodes.len() {
                0 => {}
                1 => execute_node(nodes[0], delta_time, context),
                width => {
                    self.statistics.update_parallel_level(width);
                    let tasks: Vec<_> = nodes
                        .iter()
                        .map(|&node| move || execute_node(node, delta_time, context))
                        .collect();
                    // Barrier: returns only once every system of the level is done
                    self.pool.join_all(tasks);
                }
            }
        }
    }

    fn run_load_balanced(&self, delta_time: f32, context: &TickContext<'_>) {
        let nodes: Vec<&SystemNode<W>> = (0..self.graph.level_count())
            .flat_map(|level| self.graph.level_nodes(level))
            .collect();
        if nodes.is_empty() {
            return;
        }

        let costs: Vec<Option<Duration>> = nodes
            .iter()
            .map(|node| node.statistics().average_duration())
            .collect();
        let buckets = plan_buckets(&costs, self.config.max_threads(), self.config.load_balancing());

        if self.config.load_balancing() {
            self.report_utilization(&buckets, &costs);
        }

        let active = buckets.iter().filter(|bucket| !bucket.is_empty()).count();
        if active > 1 {
            self.statistics.update_parallel_level(active);
        }

        let graph = &self.graph;
        let nodes = &nodes;
        let tasks: Vec<_> = buckets
            .iter()
            .filter(|bucket| !bucket.is_empty())
            .map(|bucket| {
                move || {
                    for &position in bucket {
                        let node = nodes[position];
                        if graph.can_execute(node) {
                            execute_node(node, delta_time, context);
                        } else {
                            tracing::trace!(system = %node.name(), "dependency still executing, skipping this pass");
                            context.skip();
                        }
                    }
                }
            })
            .collect();
        self.pool.join_all(tasks);
    }

    fn report_utilization(&self, buckets: &[Vec<usize>], costs: &[Option<Duration>]) {
        let loads: Vec<Duration> = buckets
            .iter()
            .map(|bucket| bucket.iter().filter_map(|&i| costs[i]).sum())
            .collect();
        let max = loads.iter().max().copied().unwrap_or_default();
        if max.is_zero() {
            return;
        }
        let total: Duration = loads.iter().sum();
        let utilization = total.as_secs_f64() / (max.as_secs_f64() * loads.len() as f64);
        if utilization < f64::from(self.config.load_balancing_threshold()) {
            tracing::debug!(
                utilization,
                threshold = self.config.load_balancing_threshold(),
                "worker buckets are unevenly loaded"
            );
        }
    }

    /// Pause a running system
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SystemNotFound`] for unknown ids and
    /// [`SchedulerError::InvalidState`] if the system is not running.
    pub fn pause_system(&self, id: SystemId) -> SchedulerResult<()> {
        self.transition(id, "pause", SystemCore::pause)
    }

    /// Resume a paused system
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SystemNotFound`] for unknown ids and
    /// [`SchedulerError::InvalidState`] if the system is not paused.
    pub fn resume_system(&self, id: SystemId) -> SchedulerResult<()> {
        self.transition(id, "resume", SystemCore::resume)
    }

    fn transition(
        &self,
        id: SystemId,
        action: &'static str,
        apply: fn(&mut SystemCore) -> bool,
    ) -> SchedulerResult<()> {
        let mut system = self.node(id)?.lock();
        let core = system.core_mut();
        if apply(core) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidState {
                name: core.name().to_string(),
                action,
                state: core.state(),
            })
        }
    }

    /// Enable or disable a system without touching the graph
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SystemNotFound`] for unknown ids.
    pub fn set_system_enabled(&self, id: SystemId, enabled: bool) -> SchedulerResult<()> {
        self.node(id)?.lock().set_enabled(enabled);
        Ok(())
    }

    /// Destroy every system and drain the worker pool
    ///
    /// Returns false if the pool did not drain within the default grace
    /// period.
    pub fn shutdown(&mut self) -> bool {
        for node in self.graph.nodes_mut() {
            destroy_system(&mut **node.lock());
        }
        let drained = self.pool.shutdown_default();
        tracing::info!(systems = self.graph.len(), drained, "scheduler shut down");
        drained
    }

    fn node(&self, id: SystemId) -> SchedulerResult<&SystemNode<W>> {
        self.graph.node(id).ok_or(SchedulerError::SystemNotFound(id))
    }

    /// Current configuration
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Replace the configuration
    ///
    /// The worker pool keeps its size; `max_threads` still sets the bucket
    /// count for load balancing.
    pub fn set_config(&mut self, config: ScheduleConfig) {
        self.statistics.set_window(config.adaptive_window_size());
        tracing::debug!(strategy = %config.strategy(), "schedule config replaced");
        self.config = config;
    }

    /// Aggregate statistics
    pub fn statistics(&self) -> &Arc<ScheduleStatistics> {
        &self.statistics
    }

    /// The worker pool
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The dependency graph
    pub fn graph(&self) -> &DependencyGraph<W> {
        &self.graph
    }

    /// Number of registered systems
    pub fn system_count(&self) -> usize {
        self.graph.len()
    }

    /// Number of execution levels
    pub fn level_count(&self) -> usize {
        self.graph.level_count()
    }

    /// System names per execution level
    pub fn execution_levels(&self) -> Vec<Vec<String>> {
        (0..self.graph.level_count())
            .map(|level| {
                self.graph
                    .level_nodes(level)
                    .into_iter()
                    .map(|node| node.name().to_string())
                    .collect()
            })
            .collect()
    }

    /// Execution level of a system
    pub fn level_of(&self, id: SystemId) -> Option<usize> {
        self.graph.level_of(id)
    }

    /// Statistics of one system
    pub fn system_statistics(&self, id: SystemId) -> Option<Arc<SystemStatistics>> {
        self.graph.node(id).map(|node| Arc::clone(node.statistics()))
    }

    /// Lifecycle state of one system
    pub fn system_state(&self, id: SystemId) -> Option<SystemState> {
        self.graph.node(id).map(|node| node.lock().state())
    }

    /// Most recent failure message of one system
    pub fn last_error(&self, id: SystemId) -> Option<String> {
        self.graph.node(id).and_then(SystemNode::last_error)
    }
}

/// Run one system with skip checks, timing and fault capture
fn execute_node<W>(node: &SystemNode<W>, delta_time: f32, context: &TickContext<'_>) {
    let mut system = node.lock();
    let ready = panic::catch_unwind(AssertUnwindSafe(|| {
        system.state() == SystemState::Running
            && system.is_enabled()
            && system.should_update(delta_time)
    }));
    match ready {
        Ok(true) => {}
        Ok(false) => {
            context.skip();
            return;
        }
        Err(payload) => {
            drop(system);
            let message = format!("should_update panicked: {}", panic_message(payload.as_ref()));
            node.statistics().record_error();
            context.skip();
            context.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(system = %node.name(), error = %message, "system skip check failed");
            node.set_last_error(message);
            return;
        }
    }
    if !node.begin_execution() {
        context.skip();
        return;
    }

    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| system.update(delta_time)));
    let elapsed = start.elapsed();
    node.end_execution();
    drop(system);

    node.statistics().record_update(elapsed);
    context.executed.fetch_add(1, Ordering::Relaxed);
    if context.profiling {
        context.statistics.record_system_time(node.name(), elapsed);
    }

    if let Err(message) = flatten_outcome(outcome) {
        node.statistics().record_error();
        context.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(system = %node.name(), error = %message, "system update failed");
        node.set_last_error(message);
    }
}

fn destroy_system<W>(system: &mut dyn System<W>) {
    if system.state() == SystemState::Destroyed {
        return;
    }
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| system.destroy())) {
        system.statistics().record_error();
        tracing::error!(system = %system.name(), error = %panic_message(payload.as_ref()), "system panicked during destroy");
    }
    system.core_mut().set_state(SystemState::Destroyed);
    tracing::debug!(system = %system.name(), "system destroyed");
}

fn flatten_outcome(
    outcome: std::thread::Result<crate::ecs::system::SystemResult>,
) -> Result<(), String> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Assign systems to worker buckets
///
/// With `balance` set, systems are taken in descending order of estimated
/// cost (unmeasured systems last) and each goes to the bucket with the
/// smallest accumulated cost, ties broken by fewest systems, then lowest
/// index. Without it, systems are dealt round-robin in input order.
///
/// Returns input indices per bucket.
pub fn plan_buckets(costs: &[Option<Duration>], buckets: usize, balance: bool) -> Vec<Vec<usize>> {
    let buckets = buckets.max(1);
    let mut plan: Vec<Vec<usize>> = vec![Vec::new(); buckets];

    if !balance {
        for position in 0..costs.len() {
            plan[position % buckets].push(position);
        }
        return plan;
    }

    let mut order: Vec<usize> = (0..costs.len()).collect();
    // Stable: equal costs keep level order
    order.sort_by(|&a, &b| match (costs[a], costs[b]) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut loads = vec![Duration::ZERO; buckets];
    for position in order {
        let target = (0..buckets)
            .min_by_key(|&bucket| (loads[bucket], plan[bucket].len(), bucket))
            .unwrap_or(0);
        loads[target] += costs[position].unwrap_or_default();
        plan[target].push(position);
    }
    plan
}
