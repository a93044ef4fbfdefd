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
//! Game loop example
//!
//! Wires a handful of systems into a scheduler sharing one worker pool with a
//! batch processor, then runs a few seconds of ticks and prints diagnostics.
//!
//! Run with `RUST_LOG=system_scheduler=debug` to see scheduler logging, and
//! `ECS_SCHEDULER_STRATEGY=dynamic_load_balance` to switch strategy.

use parking_lot::RwLock;
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;
use system_scheduler::batch::{BatchConfig, BatchProcessor};
use system_scheduler::ecs::{
    Priority, ScheduleConfig, Scheduler, System, SystemCore, SystemId, SystemResult,
};
use system_scheduler::executor::WorkerPool;
use tracing_subscriber::EnvFilter;

/// Shared world handed to systems at initialization
struct GameWorld {
    positions: Arc<RwLock<Vec<f32>>>,
    velocities: Arc<RwLock<Vec<f32>>>,
}

struct InputSystem {
    core: SystemCore,
    velocities: Option<Arc<RwLock<Vec<f32>>>>,
    tick: u64,
}

impl System<GameWorld> for InputSystem {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SystemCore {
        &mut self.core
    }

    fn initialize(&mut self, world: &GameWorld) -> SystemResult {
        self.velocities = Some(Arc::clone(&world.velocities));
        Ok(())
    }

    fn update(&mut self, _delta_time: f32) -> SystemResult {
        self.tick += 1;
        let velocities = self.velocities.as_ref().ok_or("input not initialized")?;
        let boost = if self.tick % 60 == 0 { 1.0 } else { 0.0 };
        for v in velocities.write().iter_mut() {
            *v += boost;
        }
        Ok(())
    }
}

struct MovementSystem {
    core: SystemCore,
    batch: Arc<BatchProcessor>,
    world: Option<(Arc<RwLock<Vec<f32>>>, Arc<RwLock<Vec<f32>>>)>,
}

impl System<GameWorld> for MovementSystem {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SystemCore {
        &mut self.core
    }

    fn initialize(&mut self, world: &GameWorld) -> SystemResult {
        self.world = Some((Arc::clone(&world.positions), Arc::clone(&world.velocities)));
        Ok(())
    }

    fn update(&mut self, delta_time: f32) -> SystemResult {
        let (positions, velocities) = self.world.as_ref().ok_or("movement not initialized")?;
        let velocities = velocities.read();
        let mut positions = positions.write();
        self.batch.process_vectorized(&mut positions[..], |range, offset| {
            for (i, p) in range.iter_mut().enumerate() {
                *p += velocities[offset + i] * delta_time;
            }
        });
        Ok(())
    }
}

/// Independent system that occasionally fails
struct AiSystem {
    core: SystemCore,
    decisions: u64,
}

impl System<GameWorld> for AiSystem {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SystemCore {
        &mut self.core
    }

    fn update(&mut self, _delta_time: f32) -> SystemResult {
        self.decisions += 1;
        if self.decisions % 97 == 0 {
            return Err(format!("no path found on decision {}", self.decisions).into());
        }
        std::thread::sleep(Duration::from_micros(200));
        Ok(())
    }
}

/// Runs every tenth tick
struct PersistenceSystem {
    core: SystemCore,
    elapsed: Cell<f32>,
}

impl System<GameWorld> for PersistenceSystem {
    fn core(&self) -> &SystemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SystemCore {
        &mut self.core
    }

    fn should_update(&self, delta_time: f32) -> bool {
        self.elapsed.set(self.elapsed.get() + delta_time);
        self.is_enabled() && self.elapsed.get() >= 10.0 / 60.0
    }

    fn update(&mut self, delta_time: f32) -> SystemResult {
        self.elapsed.set(0.0);
        tracing::debug!(delta_time, "snapshot saved");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("System Scheduler - Game Loop Example");
    println!("====================================\n");

    let config = ScheduleConfig::from_env().with_profiling(true);
    let pool = Arc::new(WorkerPool::new(config.max_threads())?);
    let batch = Arc::new(BatchProcessor::with_pool(
        BatchConfig::default(),
        Arc::clone(&pool),
    ));
    let mut scheduler: Scheduler<GameWorld> = Scheduler::with_pool(config, pool);

    let entity_count = 50_000;
    let world = GameWorld {
        positions: Arc::new(RwLock::new(vec![0.0; entity_count])),
        velocities: Arc::new(RwLock::new(vec![1.0; entity_count])),
    };

    let input = scheduler.next_system_id();
    scheduler.register(InputSystem {
        core: SystemCore::new(input, "input").with_priority(Priority::HIGHEST),
        velocities: None,
        tick: 0,
    });
    let movement = scheduler.next_system_id();
    scheduler.register(MovementSystem {
        core: SystemCore::new(movement, "movement").with_dependency(input),
        batch: Arc::clone(&batch),
        world: None,
    });
    let ai = scheduler.next_system_id();
    scheduler.register(AiSystem {
        core: SystemCore::new(ai, "ai").with_dependency(input),
        decisions: 0,
    });
    let persistence: SystemId = scheduler.next_system_id();
    scheduler.register(PersistenceSystem {
        core: SystemCore::new(persistence, "persistence")
            .with_priority(Priority::LOWEST)
            .with_dependencies([movement, ai]),
        elapsed: Cell::new(0.0),
    });

    let initialized = scheduler.initialize(&world);
    println!("Initialized {} systems", initialized);
    scheduler.build()?;
    for (level, names) in scheduler.execution_levels().iter().enumerate() {
        println!("  level {}: {}", level, names.join(", "));
    }

    let delta_time = 1.0 / 60.0;
    let mut failed = 0;
    for _ in 0..300 {
        let report = scheduler.schedule(delta_time)?;
        failed += report.failed;
    }

    let stats = scheduler.statistics();
    println!("\nTicks:            {}", stats.schedule_count());
    println!("Average tick:     {:?}", stats.average_schedule_time());
    if let Some(recent) = stats.recent_average_schedule_time() {
        println!("Recent average:   {:?}", recent);
    }
    println!("Max parallelism:  {}", stats.max_parallel_level());
    println!("Failed updates:   {}", failed);
    if let Some(error) = scheduler.last_error(ai) {
        println!("Last AI error:    {}", error);
    }
    for (name, time) in stats.system_execution_times() {
        println!("  {:<12} last {:?}", name, time);
    }

    let batch_stats = batch.statistics();
    println!("\nBatch calls:      {}", batch_stats.total_batches());
    println!("Items/second:     {:.0}", batch_stats.throughput());
    println!("Batch size now:   {}", batch.current_batch_size());

    scheduler.shutdown();
    Ok(())
}
