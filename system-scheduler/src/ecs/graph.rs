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
//! Dependency graph builder
//!
//! Turns the flat registry of systems into a DAG and assigns every system an
//! execution level:
//!
//! - Declared dependency ids are resolved against registered systems; unknown
//!   ids are dropped.
//! - A depth-first walk with a recursion stack rejects cycles.
//! - A breadth-first peel of zero in-degree nodes assigns each wave the next
//!   level, so a node's level is one more than the deepest of its dependencies.
//!
//! The graph is rebuilt from scratch after any registration change. A rebuild
//! is computed on the side and only committed on success, so a rejected
//! registration never corrupts the last valid schedule.

use crate::ecs::statistics::SystemStatistics;
use crate::ecs::system::{System, SystemId};
use crate::error::{SchedulerError, SchedulerResult};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A registered system together with its graph relations
pub struct SystemNode<W> {
    id: SystemId,
    name: String,
    priority: i32,
    sequence: u64,
    system: Mutex<Box<dyn System<W>>>,
    statistics: Arc<SystemStatistics>,
    dependencies: BTreeSet<SystemId>,
    dependents: BTreeSet<SystemId>,
    execution_level: Option<usize>,
    executing: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl<W> SystemNode<W> {
    fn new(system: Box<dyn System<W>>, sequence: u64) -> Self {
        SystemNode {
            id: system.id(),
            name: system.name().to_string(),
            priority: system.priority(),
            sequence,
            statistics: Arc::clone(system.statistics()),
            system: Mutex::new(system),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            execution_level: None,
            executing: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Get the system id
    pub fn id(&self) -> SystemId {
        self.id
    }

    /// Get the display name captured at registration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the priority captured at the last successful build
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Nodes that must finish before this one starts
    pub fn dependencies(&self) -> &BTreeSet<SystemId> {
        &self.dependencies
    }

    /// Nodes that depend on this one
    pub fn dependents(&self) -> &BTreeSet<SystemId> {
        &self.dependents
    }

    /// Topological depth, `None` until the node has been part of a successful build
    pub fn execution_level(&self) -> Option<usize> {
        self.execution_level
    }

    /// Execution statistics of the wrapped system
    pub fn statistics(&self) -> &Arc<SystemStatistics> {
        &self.statistics
    }

    /// Whether the system is currently running on some thread
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Most recent failure message, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Lock the wrapped system
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn System<W>>> {
        self.system.lock()
    }

    /// Mark the node as executing
    ///
    /// Returns false if it was already executing.
    pub(crate) fn begin_execution(&self) -> bool {
        self.executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_execution(&self) {
        self.executing.store(false, Ordering::Release);
    }

    pub(crate) fn set_last_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    fn into_system(self) -> Box<dyn System<W>> {
        self.system.into_inner()
    }
}

/// Registry of systems plus the cached level assignment
pub struct DependencyGraph<W> {
    nodes: Vec<SystemNode<W>>,
    index: HashMap<SystemId, usize>,
    levels: Vec<Vec<SystemId>>,
    dirty: bool,
    next_sequence: u64,
}

impl<W> DependencyGraph<W> {
    /// Create an empty graph
    pub fn new() -> Self {
        DependencyGraph {
            nodes: Vec::new(),
            index: HashMap::new(),
            levels: Vec::new(),
            dirty: false,
            next_sequence: 0,
        }
    }

    /// Add a system to the registry
    ///
    /// Registering an id that is already known is a no-op and returns false.
    pub fn register(&mut self, system: Box<dyn System<W>>) -> bool {
        let id = system.id();
        if self.index.contains_key(&id) {
            tracing::warn!(system = %system.name(), %id, "system already registered, ignoring");
            return false;
        }

        let node = SystemNode::new(system, self.next_sequence);
        self.next_sequence += 1;
        tracing::debug!(system = %node.name, %id, "registered system");

        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        self.dirty = true;
        true
    }

    /// Remove a system and strip it from every other node's relations
    ///
    /// The removed system is handed back so the caller can destroy it.
    pub fn unregister(&mut self, id: SystemId) -> Option<Box<dyn System<W>>> {
        let position = self.index.remove(&id)?;
        let node = self.nodes.remove(position);

        for other in &mut self.nodes {
            other.dependencies.remove(&id);
            other.dependents.remove(&id);
        }
        for level in &mut self.levels {
            level.retain(|member| *member != id);
        }
        self.reindex();
        self.dirty = true;

        tracing::debug!(system = %node.name, %id, "unregistered system");
        Some(node.into_system())
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (position, node) in self.nodes.iter().enumerate() {
            self.index.insert(node.id, position);
        }
    }

    /// Rebuild relations and levels if the registry changed
    ///
    /// Cheap to call every tick. On a cycle the previous graph stays in place
    /// and the graph remains dirty.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::CyclicDependency`] if the declared
    /// dependencies contain a cycle.
    pub fn build(&mut self) -> SchedulerResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let count = self.nodes.len();
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let mut priorities = Vec::with_capacity(count);

        for (position, node) in self.nodes.iter_mut().enumerate() {
            let system = node.system.get_mut();
            priorities.push(system.priority());
            for dependency in system.dependencies() {
                match self.index.get(dependency) {
                    Some(&target) => {
                        dependencies[position].insert(target);
                        dependents[target].insert(position);
                    }
                    None => {
                        tracing::trace!(system = %node.name, %dependency, "dropping unknown dependency");
                    }
                }
            }
        }

        if let Some(position) = find_cycle(&dependencies) {
            let node = &self.nodes[position];
            tracing::error!(system = %node.name, id = %node.id, "cyclic system dependency, keeping previous schedule");
            return Err(SchedulerError::CyclicDependency {
                id: node.id,
                name: node.name.clone(),
            });
        }

        let waves = peel_levels(&dependencies, &dependents, |position| {
            (priorities[position], self.nodes[position].sequence)
        });

        // Commit
        let ids: Vec<SystemId> = self.nodes.iter().map(|node| node.id).collect();
        let mut levels = Vec::with_capacity(waves.len());
        for (level, wave) in waves.into_iter().enumerate() {
            let mut members = Vec::with_capacity(wave.len());
            for position in wave {
                self.nodes[position].execution_level = Some(level);
                members.push(ids[position]);
            }
            levels.push(members);
        }
        for (position, node) in self.nodes.iter_mut().enumerate() {
            node.priority = priorities[position];
            node.dependencies = dependencies[position].iter().map(|&d| ids[d]).collect();
            node.dependents = dependents[position].iter().map(|&d| ids[d]).collect();
        }
        self.levels = levels;
        self.dirty = false;

        tracing::debug!(
            systems = self.nodes.len(),
            levels = self.levels.len(),
            "rebuilt system dependency graph"
        );
        Ok(())
    }

    /// Whether a rebuild is pending
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of registered systems
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no systems are registered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of execution levels in the current schedule
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// System ids per level, in run order
    pub fn levels(&self) -> &[Vec<SystemId>] {
        &self.levels
    }

    /// Look up a node by id
    pub fn node(&self, id: SystemId) -> Option<&SystemNode<W>> {
        self.index.get(&id).map(|&position| &self.nodes[position])
    }

    /// Iterate over all nodes in registration order
    pub fn nodes(&self) -> impl Iterator<Item = &SystemNode<W>> {
        self.nodes.iter()
    }

    /// Iterate over all nodes mutably
    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut SystemNode<W>> {
        self.nodes.iter_mut()
    }

    /// Nodes of one level, in run order
    pub fn level_nodes(&self, level: usize) -> Vec<&SystemNode<W>> {
        self.levels
            .get(level)
            .map(|members| members.iter().filter_map(|id| self.node(*id)).collect())
            .unwrap_or_default()
    }

    /// Execution level of a system in the current schedule
    pub fn level_of(&self, id: SystemId) -> Option<usize> {
        self.node(id).and_then(|node| node.execution_level)
    }

    /// Whether a node may start now
    ///
    /// True only if the node is idle and none of its direct dependencies are
    /// executing. This is a liveness hint for load balancing, not a barrier.
    pub fn can_execute(&self, node: &SystemNode<W>) -> bool {
        !node.is_executing()
            && node
                .dependencies
                .iter()
                .filter_map(|id| self.node(*id))
                .all(|dependency| !dependency.is_executing())
    }
}

impl<W> Default for DependencyGraph<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first cycle search over an explicit stack
///
/// Returns the node on which a back-edge was found.
fn find_cycle(dependencies: &[BTreeSet<usize>]) -> Option<usize> {
    let mut visited = vec![false; dependencies.len()];
    let mut on_stack = vec![false; dependencies.len()];

    for root in 0..dependencies.len() {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        on_stack[root] = true;
        let mut stack = vec![(root, dependencies[root].iter())];

        while let Some((position, pending)) = stack.last_mut() {
            let position = *position;
            match pending.next().copied() {
                Some(dependency) if on_stack[dependency] => return Some(dependency),
                Some(dependency) if !visited[dependency] => {
                    visited[dependency] = true;
                    on_stack[dependency] = true;
                    stack.push((dependency, dependencies[dependency].iter()));
                }
                Some(_) => {}
                None => {
                    on_stack[position] = false;
                    stack.pop();
                }
            }
        }
    }
    None
}

/// Kahn-style wave peeling
///
/// Every wave holds the nodes whose dependencies all sit in earlier waves,
/// sorted by `order_key`. Assumes the input is acyclic.
fn peel_levels<K: Ord>(
    dependencies: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
    order_key: impl Fn(usize) -> K,
) -> Vec<Vec<usize>> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut wave: Vec<usize> = (0..dependencies.len())
        .filter(|&position| in_degree[position] == 0)
        .collect();
    let mut waves = Vec::new();

    while !wave.is_empty() {
        wave.sort_by_key(|&position| order_key(position));
        let mut next = Vec::new();
        for &position in &wave {
            for &dependent in &dependents[position] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        waves.push(std::mem::replace(&mut wave, next));
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::system::{Priority, SystemCore, SystemResult};

    struct TestSystem {
        core: SystemCore,
    }

    impl TestSystem {
        fn boxed(id: u64, name: &str, deps: &[u64]) -> Box<dyn System> {
            Box::new(TestSystem {
                core: SystemCore::new(SystemId::new(id), name)
                    .with_dependencies(deps.iter().map(|&d| SystemId::new(d))),
            })
        }
    }

    impl System for TestSystem {
        fn core(&self) -> &SystemCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut SystemCore {
            &mut self.core
        }

        fn update(&mut self, _delta_time: f32) -> SystemResult {
            Ok(())
        }
    }

    fn diamond() -> DependencyGraph<()> {
        let mut graph = DependencyGraph::new();
        graph.register(TestSystem::boxed(1, "a", &[]));
        graph.register(TestSystem::boxed(2, "b", &[1]));
        graph.register(TestSystem::boxed(3, "c", &[1]));
        graph.register(TestSystem::boxed(4, "d", &[2, 3]));
        graph
    }

    fn id(raw: u64) -> SystemId {
        SystemId::new(raw)
    }

    #[test]
    fn test_diamond_levels() {
        let mut graph = diamond();
        graph.build().unwrap();

        assert_eq!(graph.level_count(), 3);
        assert_eq!(graph.levels()[0], vec![id(1)]);
        assert_eq!(graph.levels()[1], vec![id(2), id(3)]);
        assert_eq!(graph.levels()[2], vec![id(4)]);
        assert_eq!(graph.level_of(id(4)), Some(2));
    }

    #[test]
    fn test_relations_are_mutual() {
        let mut graph = diamond();
        graph.build().unwrap();

        for node in graph.nodes() {
            for dependency in node.dependencies() {
                let target = graph.node(*dependency).unwrap();
                assert!(target.dependents().contains(&node.id()));
            }
        }
        assert_eq!(graph.node(id(1)).unwrap().dependents().len(), 2);
    }

    #[test]
    fn test_build_is_idempotent() {
        let mut graph = diamond();
        graph.build().unwrap();
        let first = graph.levels().to_vec();
        assert!(!graph.is_dirty());

        graph.build().unwrap();
        assert_eq!(graph.levels(), first.as_slice());
    }

    #[test]
    fn test_unknown_dependencies_are_dropped() {
        let mut graph = DependencyGraph::<()>::new();
        graph.register(TestSystem::boxed(1, "a", &[99]));
        graph.build().unwrap();

        assert_eq!(graph.level_of(id(1)), Some(0));
        assert!(graph.node(id(1)).unwrap().dependencies().is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let mut graph = DependencyGraph::<()>::new();
        assert!(graph.register(TestSystem::boxed(1, "a", &[])));
        assert!(!graph.register(TestSystem::boxed(1, "a-again", &[])));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node(id(1)).unwrap().name(), "a");
    }

    #[test]
    fn test_cycle_keeps_previous_graph() {
        let mut graph = diamond();
        graph.build().unwrap();
        let before = graph.levels().to_vec();

        graph.register(TestSystem::boxed(5, "e", &[6]));
        graph.register(TestSystem::boxed(6, "f", &[5]));
        let err = graph.build().unwrap_err();
        assert!(matches!(err, SchedulerError::CyclicDependency { .. }));

        assert_eq!(graph.levels(), before.as_slice());
        assert!(graph.is_dirty());
        assert_eq!(graph.level_of(id(5)), None);
        assert_eq!(graph.level_of(id(4)), Some(2));
    }

    #[test]
    fn test_cycle_error_is_deterministic() {
        let build = || {
            let mut graph = DependencyGraph::<()>::new();
            graph.register(TestSystem::boxed(1, "a", &[3]));
            graph.register(TestSystem::boxed(2, "b", &[1]));
            graph.register(TestSystem::boxed(3, "c", &[2]));
            match graph.build() {
                Err(SchedulerError::CyclicDependency { id, .. }) => id,
                other => panic!("expected cycle, got {:?}", other),
            }
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::<()>::new();
        graph.register(TestSystem::boxed(1, "a", &[1]));
        assert!(graph.build().is_err());
    }

    #[test]
    fn test_unregister_strips_relations() {
        let mut graph = diamond();
        graph.build().unwrap();

        let removed = graph.unregister(id(2)).unwrap();
        assert_eq!(removed.name(), "b");
        assert!(graph.is_dirty());
        assert!(!graph.node(id(4)).unwrap().dependencies().contains(&id(2)));
        assert!(!graph.node(id(1)).unwrap().dependents().contains(&id(2)));
        assert!(graph.levels().iter().all(|level| !level.contains(&id(2))));

        graph.build().unwrap();
        assert_eq!(graph.level_of(id(4)), Some(2));
        assert!(graph.unregister(id(2)).is_none());
    }

    #[test]
    fn test_priority_orders_within_level() {
        let mut graph = DependencyGraph::<()>::new();
        graph.register(TestSystem::boxed(1, "late", &[]));
        graph.register(Box::new(TestSystem {
            core: SystemCore::new(id(2), "early").with_priority(Priority::HIGHEST),
        }));
        graph.register(TestSystem::boxed(3, "middle", &[]));
        graph.build().unwrap();

        // Equal priorities keep registration order
        assert_eq!(graph.levels()[0], vec![id(2), id(1), id(3)]);
    }

    #[test]
    fn test_can_execute_respects_dependencies() {
        let mut graph = diamond();
        graph.build().unwrap();

        let a = graph.node(id(1)).unwrap();
        let b = graph.node(id(2)).unwrap();
        assert!(graph.can_execute(b));

        assert!(a.begin_execution());
        assert!(!a.begin_execution());
        assert!(!graph.can_execute(a));
        assert!(!graph.can_execute(b));
        a.end_execution();
        assert!(graph.can_execute(b));
    }

    #[test]
    fn test_empty_graph_builds() {
        let mut graph = DependencyGraph::<()>::new();
        graph.build().unwrap();
        assert_eq!(graph.level_count(), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cycle_search_handles_long_chains() {
        // Each node depends on the previous one
        let length = 200_000;
        let mut chain: Vec<BTreeSet<usize>> = (0..length)
            .map(|i| if i == 0 { BTreeSet::new() } else { BTreeSet::from([i - 1]) })
            .collect();
        assert_eq!(find_cycle(&chain), None);

        chain[0].insert(length - 1);
        assert!(find_cycle(&chain).is_some());
    }

    #[test]
    fn test_cycle_search_ignores_shared_ancestors() {
        // Diamond reached twice is not a cycle
        let deps = vec![
            BTreeSet::new(),
            BTreeSet::from([0]),
            BTreeSet::from([0]),
            BTreeSet::from([1, 2]),
        ];
        assert_eq!(find_cycle(&deps), None);
        assert_eq!(find_cycle(&[BTreeSet::from([0])]), Some(0));
    }
}
