//! Fixed-timestep frame loop.
//!
//! Each tick runs one scheduler frame with the nominal step as `dt`. The
//! loop awaits between ticks, which is where module loads spawned onto the
//! runtime make progress.

use std::future::Future;
use std::time::Duration;

use engine_script::{FrameInfo, Scheduler};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the frame loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

/// Drives a [`Scheduler`] one frame per tick.
#[derive(Debug)]
pub struct TickLoop {
    /// Ticks run so far.
    tick_id: u64,
    config: TickConfig,
    scheduler: Scheduler,
}

impl TickLoop {
    /// Create a loop over `scheduler`. `config.tick_rate` must be finite and
    /// positive.
    #[must_use]
    pub fn new(config: TickConfig, scheduler: Scheduler) -> Self {
        Self {
            tick_id: 0,
            config,
            scheduler,
        }
    }

    /// Returns the current tick counter.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Returns a reference to the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns a mutable reference to the scheduler.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Run one frame.
    pub fn tick(&mut self, dt: f64) -> FrameInfo {
        self.tick_id += 1;
        debug!(tick_id = self.tick_id, dt, "tick start");
        self.scheduler.frame(dt)
    }

    /// Tick at the configured rate until `max_ticks` is reached or
    /// `shutdown` resolves. Returns the number of ticks run.
    pub async fn run_async(&mut self, shutdown: impl Future<Output = ()>) -> u64 {
        let tick_duration = Duration::from_secs_f64(1.0 / self.config.tick_rate);
        let mut interval = tokio::time::interval(tick_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        let mut tick_count = 0u64;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(ticks = tick_count, "tick loop interrupted");
                    break;
                }
                _ = interval.tick() => {}
            }

            let start = Instant::now();
            self.tick(tick_duration.as_secs_f64());
            tick_count += 1;

            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(ticks = tick_count, "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed > tick_duration {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
        tick_count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engine_script::{
        ComponentConfig, Entity, InstanceState, ModuleDefinition, ScriptSystem, ScriptSystemConfig,
    };
    use tokio::runtime::Handle;

    use super::*;
    use crate::demo;

    #[test]
    fn test_tick_advances_counter() {
        let config = TickConfig {
            tick_rate: 60.0,
            max_ticks: 0,
        };
        let mut tick_loop = TickLoop::new(config, Scheduler::new());
        assert_eq!(tick_loop.tick_id(), 0);
        assert_eq!(tick_loop.tick(1.0 / 60.0).frame, 1);
        tick_loop.tick(1.0 / 60.0);
        assert_eq!(tick_loop.tick_id(), 2);
        assert_eq!(tick_loop.scheduler().frame_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_limited_ticks() {
        let config = TickConfig {
            tick_rate: 1000.0,
            max_ticks: 5,
        };
        let mut tick_loop = TickLoop::new(config, Scheduler::new());
        assert_eq!(tick_loop.run_async(std::future::pending()).await, 5);
        assert_eq!(tick_loop.tick_id(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_unbounded_loop() {
        let config = TickConfig {
            tick_rate: 100.0,
            max_ticks: 0,
        };
        let mut tick_loop = TickLoop::new(config, Scheduler::new());
        let ticks = tick_loop
            .run_async(tokio::time::sleep(Duration::from_millis(95)))
            .await;
        assert_eq!(ticks, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loads_complete_between_ticks() {
        let mut system = ScriptSystem::new(
            ScriptSystemConfig::default(),
            Arc::new(demo::registry(Duration::from_millis(30))),
            Handle::current(),
        );
        let e = Entity::from_raw(1);
        system
            .add_component(e, ComponentConfig::new().with_module(ModuleDefinition::new("spin.mjs")))
            .unwrap();
        let mut scheduler = Scheduler::new();
        scheduler.register(system).unwrap();

        let mut tick_loop = TickLoop::new(
            TickConfig {
                tick_rate: 100.0,
                max_ticks: 2,
            },
            scheduler,
        );
        tick_loop.run_async(std::future::pending()).await;
        let system = tick_loop.scheduler().get::<ScriptSystem>().unwrap();
        let id = system.component(e).unwrap().find("spin.mjs").unwrap().id();
        assert_eq!(system.instance_state(e, id), Some(InstanceState::Pending));

        tick_loop.config.max_ticks = 5;
        tick_loop.run_async(std::future::pending()).await;
        let system = tick_loop.scheduler().get::<ScriptSystem>().unwrap();
        assert_eq!(system.instance_state(e, id), Some(InstanceState::Active));
    }
}
