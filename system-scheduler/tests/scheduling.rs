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
//! End-to-end scheduling tests
//!
//! Exercises ordering, fault isolation and graph failure handling across all
//! strategies.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use system_scheduler::ecs::{
    ScheduleConfig, ScheduleStrategy, Scheduler, System, SystemCore, SystemId, SystemResult,
};
use system_scheduler::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Start(&'static str),
    End(&'static str),
}

type Journal = Arc<Mutex<Vec<Event>>>;

/// Records start/end events and optionally misbehaves
struct Probe {
    core: SystemCore,
    label: &'static str,
    journal: Journal,
    runs: Arc<AtomicUsize>,
    work: Duration,
    fault: Fault,
}

#[derive(Clone, Copy)]
enum Fault {
    None,
    Error,
    Panic,
    PanicInShouldUpdate,
}

impl System for Probe {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SystemCore {
        &mut self.core
    }

    fn should_update(&self, _delta_time: f32) -> bool {
        if let Fault::PanicInShouldUpdate = self.fault {
            panic!("{} refused to decide", self.label);
        }
        self.is_enabled()
    }

    fn update(&mut self, _delta_time: f32) -> SystemResult {
        self.journal.lock().push(Event::Start(self.label));
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.journal.lock().push(Event::End(self.label));
        match self.fault {
            Fault::None | Fault::PanicInShouldUpdate => Ok(()),
            Fault::Error => Err(format!("{} failed", self.label).into()),
            Fault::Panic => panic!("{} panicked", self.label),
        }
    }
}

struct Harness {
    scheduler: Scheduler,
    journal: Journal,
    runs: Vec<(&'static str, SystemId, Arc<AtomicUsize>)>,
}

impl Harness {
    fn new(strategy: ScheduleStrategy) -> Self {
        let config = ScheduleConfig::new(strategy).with_max_threads(4);
        Harness {
            scheduler: Scheduler::new(config).unwrap(),
            journal: Arc::new(Mutex::new(Vec::new())),
            runs: Vec::new(),
        }
    }

    fn add(&mut self, label: &'static str, deps: &[SystemId]) -> SystemId {
        self.add_with(label, deps, Duration::ZERO, Fault::None)
    }

    fn add_with(
        &mut self,
        label: &'static str,
        deps: &[SystemId],
        work: Duration,
        fault: Fault,
    ) -> SystemId {
        let id = self.scheduler.next_system_id();
        let runs = Arc::new(AtomicUsize::new(0));
        self.scheduler.register(Probe {
            core: SystemCore::new(id, label).with_dependencies(deps.iter().copied()),
            label,
            journal: Arc::clone(&self.journal),
            runs: Arc::clone(&runs),
            work,
            fault,
        });
        self.runs.push((label, id, runs));
        id
    }

    fn runs(&self, label: &str) -> usize {
        self.runs
            .iter()
            .find(|(l, _, _)| *l == label)
            .map(|(_, _, runs)| runs.load(Ordering::SeqCst))
            .unwrap()
    }

    fn position(&self, event: Event) -> usize {
        self.journal
            .lock()
            .iter()
            .position(|e| *e == event)
            .unwrap_or_else(|| panic!("{:?} never happened", event))
    }

    /// A; B(A); C(A); D(B, C)
    fn diamond(&mut self, work: Duration) -> [SystemId; 4] {
        let a = self.add_with("A", &[], work, Fault::None);
        let b = self.add_with("B", &[a], work, Fault::None);
        let c = self.add_with("C", &[a], work, Fault::None);
        let d = self.add_with("D", &[b, c], work, Fault::None);
        [a, b, c, d]
    }
}

#[test]
fn test_diamond_levels() {
    let mut harness = Harness::new(ScheduleStrategy::SimpleParallel);
    let [a, b, c, d] = harness.diamond(Duration::ZERO);
    harness.scheduler.build().unwrap();

    let scheduler = &harness.scheduler;
    assert_eq!(scheduler.level_of(a), Some(0));
    assert_eq!(scheduler.level_of(b), Some(1));
    assert_eq!(scheduler.level_of(c), Some(1));
    assert_eq!(scheduler.level_of(d), Some(2));
    assert_eq!(scheduler.level_count(), 3);
}

#[test]
fn test_level_barriers_hold() {
    for strategy in [
        ScheduleStrategy::Sequential,
        ScheduleStrategy::SimpleParallel,
        ScheduleStrategy::PipelineParallel,
        ScheduleStrategy::Adaptive,
    ] {
        let mut harness = Harness::new(strategy);
        harness.diamond(Duration::from_millis(5));
        harness.scheduler.initialize(&());
        harness.scheduler.schedule(0.016).unwrap();

        let d_start = harness.position(Event::Start("D"));
        assert!(harness.position(Event::End("B")) < d_start, "{}", strategy);
        assert!(harness.position(Event::End("C")) < d_start, "{}", strategy);
        assert!(harness.position(Event::End("A")) < harness.position(Event::Start("B")));
        assert!(harness.position(Event::End("A")) < harness.position(Event::Start("C")));
    }
}

#[cfg(feature = "parallel")]
#[test]
fn test_same_level_runs_concurrently() {
    let mut harness = Harness::new(ScheduleStrategy::SimpleParallel);
    harness.diamond(Duration::from_millis(20));
    harness.scheduler.initialize(&());
    harness.scheduler.schedule(0.016).unwrap();

    // B and C overlap: both start before either ends
    let first_end = harness
        .position(Event::End("B"))
        .min(harness.position(Event::End("C")));
    assert!(harness.position(Event::Start("B")) < first_end);
    assert!(harness.position(Event::Start("C")) < first_end);
    assert_eq!(harness.scheduler.statistics().max_parallel_level(), 2);
}

#[test]
fn test_every_system_runs_exactly_once_per_tick() {
    let barriered = ScheduleStrategy::ALL
        .into_iter()
        .filter(|strategy| strategy.has_level_barriers());
    for strategy in barriered {
        let mut harness = Harness::new(strategy);
        harness.diamond(Duration::ZERO);
        for label in ["e0", "e1", "e2", "e3", "e4", "e5", "e6", "e7"] {
            harness.add(label, &[]);
        }
        harness.scheduler.initialize(&());

        for tick in 1..=3 {
            let report = harness.scheduler.schedule(0.016).unwrap();
            assert_eq!(report.executed, 12, "{}", strategy);
            for (label, _, runs) in &harness.runs {
                assert_eq!(runs.load(Ordering::SeqCst), tick, "{} under {}", label, strategy);
            }
        }
    }
}

#[test]
fn test_disabled_system_is_skipped_without_releveling() {
    let mut harness = Harness::new(ScheduleStrategy::SimpleParallel);
    let [_, b, _, d] = harness.diamond(Duration::ZERO);
    harness.scheduler.initialize(&());
    harness.scheduler.schedule(0.016).unwrap();

    harness.scheduler.set_system_enabled(b, false).unwrap();
    let report = harness.scheduler.schedule(0.016).unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(harness.runs("B"), 1);
    assert_eq!(harness.runs("D"), 2);
    assert_eq!(harness.scheduler.level_of(d), Some(2));
    assert!(!harness.scheduler.graph().is_dirty());
}

#[test]
fn test_faults_are_isolated() {
    let barriered = ScheduleStrategy::ALL
        .into_iter()
        .filter(|strategy| strategy.has_level_barriers());
    for strategy in barriered {
        let mut harness = Harness::new(strategy);
        let root = harness.add("root", &[]);
        let broken = harness.add_with("broken", &[root], Duration::ZERO, Fault::Error);
        let panicky = harness.add_with("panicky", &[root], Duration::ZERO, Fault::Panic);
        let undecided = harness.add_with(
            "undecided",
            &[root],
            Duration::ZERO,
            Fault::PanicInShouldUpdate,
        );
        harness.add("sibling", &[root]);
        harness.add("leaf", &[broken, panicky, undecided]);
        harness.scheduler.initialize(&());

        let report = harness.scheduler.schedule(0.016).unwrap();
        assert_eq!(report.executed, 5, "{}", strategy);
        assert_eq!(report.failed, 3, "{}", strategy);
        assert_eq!(report.skipped, 1, "{}", strategy);
        assert_eq!(harness.runs("sibling"), 1);
        assert_eq!(harness.runs("leaf"), 1);
        assert_eq!(harness.runs("undecided"), 0);
        assert_eq!(harness.scheduler.statistics().schedule_count(), 1);
        let refusal = harness.scheduler.last_error(undecided).unwrap();
        assert!(refusal.contains("refused to decide"), "{}", refusal);

        let stats = harness.scheduler.system_statistics(broken).unwrap();
        assert_eq!(stats.error_count(), 1);
        assert_eq!(
            harness.scheduler.last_error(broken).as_deref(),
            Some("broken failed")
        );
        let panic_message = harness.scheduler.last_error(panicky).unwrap();
        assert!(panic_message.contains("panicky panicked"), "{}", panic_message);

        // The faulty systems keep running on later ticks
        harness.scheduler.schedule(0.016).unwrap();
        assert_eq!(harness.runs("broken"), 2);
        assert_eq!(harness.runs("panicky"), 2);
        assert_eq!(harness.runs("undecided"), 0);
    }
}

#[test]
fn test_cycle_keeps_serving_previous_graph() {
    let mut harness = Harness::new(ScheduleStrategy::SimpleParallel);
    let [a, _, _, d] = harness.diamond(Duration::ZERO);
    harness.scheduler.initialize(&());
    harness.scheduler.schedule(0.016).unwrap();
    let levels = harness.scheduler.execution_levels();

    // Ids are allocated up front so the pair can reference each other
    let x = harness.scheduler.next_system_id();
    let y = harness.scheduler.next_system_id();
    for (id, other, label) in [(x, y, "X"), (y, x, "Y")] {
        harness.scheduler.register(Probe {
            core: SystemCore::new(id, label).with_dependency(other),
            label,
            journal: Arc::clone(&harness.journal),
            runs: Arc::new(AtomicUsize::new(0)),
            work: Duration::ZERO,
            fault: Fault::None,
        });
    }
    harness.scheduler.initialize(&());

    let err = harness.scheduler.schedule(0.016).unwrap_err();
    assert!(matches!(err, SchedulerError::CyclicDependency { .. }));
    assert_eq!(harness.runs("D"), 2, "previous graph still runs");
    assert_eq!(harness.scheduler.execution_levels(), levels);
    assert_eq!(harness.scheduler.level_of(x), None);
    assert_eq!(harness.scheduler.level_of(d), Some(2));

    // Breaking the cycle restores normal operation
    harness.scheduler.unregister(y).unwrap();
    let report = harness.scheduler.schedule(0.016).unwrap();
    assert_eq!(report.executed, 5);
    assert_eq!(harness.scheduler.level_of(x), Some(0));
    assert_eq!(harness.scheduler.level_of(a), Some(0));
}

#[test]
fn test_load_balanced_spreads_work() {
    let mut harness = Harness::new(ScheduleStrategy::DynamicLoadBalance);
    for label in ["w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7"] {
        harness.add_with(label, &[], Duration::from_millis(2), Fault::None);
    }
    harness.scheduler.initialize(&());

    for _ in 0..3 {
        let report = harness.scheduler.schedule(0.016).unwrap();
        assert_eq!(report.executed, 8);
    }
    assert_eq!(harness.scheduler.statistics().max_parallel_level(), 4);
    assert!(harness.runs.iter().all(|(_, _, runs)| runs.load(Ordering::SeqCst) == 3));
}

#[test]
fn test_load_balanced_guard_never_double_runs() {
    let mut harness = Harness::new(ScheduleStrategy::DynamicLoadBalance);
    harness.diamond(Duration::from_millis(1));
    harness.scheduler.initialize(&());

    for _ in 0..5 {
        let report = harness.scheduler.schedule(0.016).unwrap();
        // Guarded systems are skipped for the tick, never queued twice
        assert_eq!(report.executed + report.skipped, 4);
    }
    for label in ["A", "B", "C", "D"] {
        assert!(harness.runs(label) <= 5);
    }
    assert!(harness.runs("A") >= 1);
}

#[test]
fn test_round_robin_without_balancing() {
    let config = ScheduleConfig::new(ScheduleStrategy::DynamicLoadBalance)
        .with_max_threads(3)
        .with_load_balancing(false);
    let mut harness = Harness::new(ScheduleStrategy::DynamicLoadBalance);
    harness.scheduler.set_config(config);
    for label in ["r0", "r1", "r2", "r3", "r4"] {
        harness.add(label, &[]);
    }
    harness.scheduler.initialize(&());

    let report = harness.scheduler.schedule(0.016).unwrap();
    assert_eq!(report.executed, 5);
}

#[test]
fn test_statistics_accumulate() {
    let mut harness = Harness::new(ScheduleStrategy::Sequential);
    let a = harness.add_with("A", &[], Duration::from_millis(1), Fault::None);
    harness.scheduler.initialize(&());
    for _ in 0..4 {
        harness.scheduler.schedule(0.016).unwrap();
    }

    let stats = harness.scheduler.statistics();
    assert_eq!(stats.schedule_count(), 4);
    assert!(stats.average_schedule_time() >= Duration::from_millis(1));
    assert!(stats.recent_average_schedule_time().is_some());

    let system = harness.scheduler.system_statistics(a).unwrap();
    assert_eq!(system.update_count(), 4);
    assert!(system.min_duration().unwrap() >= Duration::from_millis(1));
}

#[test]
fn test_shutdown_then_schedule_inline() {
    let mut harness = Harness::new(ScheduleStrategy::SimpleParallel);
    harness.diamond(Duration::ZERO);
    harness.scheduler.initialize(&());
    assert!(harness.scheduler.shutdown());
    assert!(harness.scheduler.pool().is_shut_down());

    let report = harness.scheduler.schedule(0.016).unwrap();
    assert_eq!(report.executed, 0);
    assert_eq!(report.skipped, 4);
}
