//! Script components for the engine.
//!
//! An entity carries at most one [`ScriptComponent`], holding an ordered
//! list of module instances. Modules are named by specifier and resolved
//! asynchronously through a [`ModuleLoader`]; resolved modules are staged and
//! activated at the next activation flush, then driven through
//! `update` / `postUpdate` every frame until they are retired and destroyed.
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine_script::{
//!     ComponentConfig, Entity, ModuleDefinition, ModuleImplementation, ModuleRegistry, Scheduler,
//!     Script, ScriptSystem, ScriptSystemConfig,
//! };
//!
//! struct Spin;
//! impl Script for Spin {}
//!
//! # async fn run() -> anyhow::Result<()> {
//! let registry = Arc::new(ModuleRegistry::new());
//! registry.register(ModuleImplementation::new("spin.mjs", || Spin));
//!
//! let mut system = ScriptSystem::new(ScriptSystemConfig::default(), registry, tokio::runtime::Handle::current());
//! system.add_component(
//!     Entity::from_raw(1),
//!     ComponentConfig::new().with_module(ModuleDefinition::new("spin.mjs")),
//! )?;
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.register(system)?;
//! scheduler.frame(1.0 / 60.0);
//! # Ok(())
//! # }
//! ```

pub mod attribute;
pub mod clone;
pub mod component;
pub mod config;
pub mod definition;
pub mod entity;
pub mod error;
pub mod instance;
pub mod loader;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod script;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;

pub use attribute::{AttributeDef, AttributeSchema, AttributeType, AttributeValue, Attributes};
pub use component::{ComponentKey, ScriptComponent};
pub use config::ScriptSystemConfig;
pub use definition::{ComponentConfig, ModuleDefinition};
pub use entity::{Entity, EntityAllocator};
pub use error::{AttributeError, ComponentError, LoadError, ScriptError};
pub use instance::{InstanceId, InstancePool, InstanceState, ModuleSlot};
pub use loader::{CachedLoader, LoadResult, ModuleImplementation, ModuleLoader, ModuleRegistry};
pub use queue::{ActivationQueue, QueuedInstance};
pub use report::{ErrorSink, TracingSink};
pub use scheduler::{DuplicateSystem, FrameInfo, FrameSystem, Phase, Scheduler};
pub use script::{Hook, Script, ScriptCommand, ScriptContext};
pub use system::ScriptSystem;
