//! # engine_app
//!
//! Loads a scene, attaches its script components, and drives them through
//! the frame scheduler at a fixed tick rate.
//!
//! ## Startup Sequence
//!
//! 1. Parse arguments and initialise logging.
//! 2. Build the demo module registry behind a caching loader.
//! 3. Instantiate the scene (bundled demo or `--scene <file>`).
//! 4. Tick until `--max-ticks` or Ctrl-C, then shut the script system down.

mod config;
mod demo;
mod scene;
mod tick;
mod world;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use engine_script::{CachedLoader, Scheduler, ScriptSystem};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Args;
use scene::Scene;
use tick::TickLoop;
use world::World;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("engine_app=info".parse()?)
                .add_directive("engine_script=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(?args, "engine starting");

    let loader = CachedLoader::new(demo::registry(args.load_latency()));
    let mut system = ScriptSystem::new(args.script_config(), Arc::new(loader), Handle::current());

    let scene = match &args.scene {
        Some(path) => Scene::load(path)?,
        None => Scene::demo()?,
    };
    let mut world = World::new();
    let scripted = scene.instantiate(&mut world, &mut system)?;
    info!(scene = %scene.name, entities = world.len(), scripted, "scene loaded");

    let mut scheduler = Scheduler::new();
    scheduler.register(system)?;

    let mut tick_loop = TickLoop::new(args.tick_config(), scheduler);
    info!(systems = tick_loop.scheduler().system_count(), "scheduler ready");
    let ticks = tick_loop.run_async(shutdown_signal()).await;

    if let Some(system) = tick_loop.scheduler_mut().get_mut::<ScriptSystem>() {
        for entity in system.entities() {
            let name = world.name_of(entity).unwrap_or("?");
            info!(%entity, name, modules = system.component(entity).map_or(0, |c| c.len()), "still scripted");
        }
        system.shutdown();
    }

    info!(ticks, last_tick = tick_loop.tick_id(), "engine shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}
