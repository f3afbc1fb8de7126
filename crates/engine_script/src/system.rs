//! The script component system.
//!
//! Owns every live script component of one simulation, starts module loads,
//! and turns their completions into staged instances at the next
//! activation flush. Per-frame hooks are driven through the
//! [`FrameSystem`] phases:
//!
//! | phase                          | work                                              |
//! |--------------------------------|---------------------------------------------------|
//! | `FlushActivations`             | apply load completions, `initialize` then `postInitialize` staged instances |
//! | `Update`                       | `update(dt)` on every runnable instance           |
//! | `FlushUserRequestedChanges`    | apply commands queued by hooks                    |
//! | `PostUpdate`                   | `postUpdate(dt)` on every runnable instance       |
//! | `FlushRetirements`             | apply late commands, `destroy` retired instances  |
//!
//! Hooks cannot touch the component arena directly; they queue
//! [`ScriptCommand`]s. Commands and completions are only applied in flush
//! phases, so the set of instances visited by a pass is fixed for that pass.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::attribute::Attributes;
use crate::component::{ComponentKey, ScriptComponent};
use crate::config::ScriptSystemConfig;
use crate::definition::{ComponentConfig, ModuleDefinition};
use crate::entity::Entity;
use crate::error::{ComponentError, LoadError, ScriptError};
use crate::instance::{InstanceId, InstanceState, LiveInstance, ModuleSlot};
use crate::loader::{LoadResult, ModuleImplementation, ModuleLoader};
use crate::queue::{ActivationQueue, QueuedInstance};
use crate::report::{ErrorSink, TracingSink};
use crate::scheduler::{FrameInfo, FrameSystem, Phase};
use crate::script::{Hook, ScriptCommand};

/// Result of one resolve, posted from the loader task back to the
/// simulation thread.
#[derive(Debug)]
struct LoadCompletion {
    target: QueuedInstance,
    specifier: String,
    result: LoadResult,
}

/// Process-wide owner of all script components of one simulation.
pub struct ScriptSystem {
    config: ScriptSystemConfig,
    loader: Arc<dyn ModuleLoader>,
    runtime: Handle,
    sink: Box<dyn ErrorSink>,
    /// Components keyed by registration order.
    components: BTreeMap<ComponentKey, ScriptComponent>,
    by_entity: HashMap<Entity, ComponentKey>,
    next_key: u64,
    queue: ActivationQueue,
    commands: Vec<ScriptCommand>,
    completions_tx: mpsc::UnboundedSender<LoadCompletion>,
    completions_rx: mpsc::UnboundedReceiver<LoadCompletion>,
    loads_in_flight: usize,
}

impl ScriptSystem {
    /// Name under which the system registers with a scheduler.
    pub const NAME: &'static str = "script";

    /// Create a system that spawns loads onto `runtime` and reports through
    /// `tracing`.
    pub fn new(config: ScriptSystemConfig, loader: Arc<dyn ModuleLoader>, runtime: Handle) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            config,
            loader,
            runtime,
            sink: Box::new(TracingSink),
            components: BTreeMap::new(),
            by_entity: HashMap::new(),
            next_key: 0,
            queue: ActivationQueue::new(),
            commands: Vec::new(),
            completions_tx,
            completions_rx,
            loads_in_flight: 0,
        }
    }

    /// Replace the error sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Returns a reference to the system configuration.
    #[must_use]
    pub fn config(&self) -> &ScriptSystemConfig {
        &self.config
    }

    pub(crate) fn report(&mut self, err: ScriptError) {
        self.sink.report(err);
    }

    // ── Component lifecycle ─────────────────────────────────────────────

    /// Attach a script component to an entity and start loading its modules.
    ///
    /// Returns immediately; modules activate at a later flush once loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::AlreadyPresent`] if the entity already has
    /// a script component.
    pub fn add_component(&mut self, entity: Entity, config: ComponentConfig) -> Result<ComponentKey, ComponentError> {
        let key = self.register(entity, config.enabled)?;
        for definition in config.modules {
            self.create(entity, definition);
        }
        Ok(key)
    }

    fn register(&mut self, entity: Entity, enabled: bool) -> Result<ComponentKey, ComponentError> {
        if self.by_entity.contains_key(&entity) {
            return Err(ComponentError::AlreadyPresent(entity));
        }
        let key = ComponentKey(self.next_key);
        self.next_key += 1;
        self.components.insert(key, ScriptComponent::new(entity, key, enabled));
        self.by_entity.insert(entity, key);
        debug!(%entity, enabled, "script component added");
        Ok(key)
    }

    /// Remove an entity's script component.
    ///
    /// Every constructed instance is destroyed immediately, whatever its
    /// state; the flush queues are bypassed. Loads still in flight are not
    /// cancelled, but their completions find nothing and are dropped.
    /// Returns `false` if the entity had no component.
    pub fn remove_component(&mut self, entity: Entity) -> bool {
        let Some(key) = self.by_entity.remove(&entity) else {
            return false;
        };
        let Some(mut component) = self.components.remove(&key) else {
            return false;
        };

        let mut destroyed = 0usize;
        for mut slot in component.pool.drain() {
            if matches!(
                slot.state(),
                InstanceState::Staged | InstanceState::Active | InstanceState::Retiring
            ) {
                self.destroy_slot(entity, &mut slot);
                destroyed += 1;
            }
        }
        debug!(%entity, destroyed, "script component removed");
        true
    }

    /// Enable or disable a component. Disabled components receive no hooks;
    /// their loads still complete and stage, and activate once re-enabled.
    /// Returns `false` if the entity has no component.
    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) -> bool {
        match self.component_mut(entity) {
            Some(component) => {
                component.set_enabled(enabled);
                debug!(%entity, enabled, "script component toggled");
                true
            }
            None => false,
        }
    }

    // ── Module lifecycle ────────────────────────────────────────────────

    /// Record a module definition on an entity's component and start
    /// resolving it. The returned id stays valid for the instance's whole
    /// life. Returns `None` if the entity has no component.
    pub fn create(&mut self, entity: Entity, definition: ModuleDefinition) -> Option<InstanceId> {
        let key = *self.by_entity.get(&entity)?;
        let component = self.components.get_mut(&key)?;
        let specifier = definition.module_specifier.clone();
        let instance = component.pool.push_pending(definition);

        let pending = self.loader.resolve(&specifier);
        let tx = self.completions_tx.clone();
        let target = QueuedInstance {
            component: key,
            entity,
            instance,
        };
        self.loads_in_flight += 1;
        debug!(%entity, %instance, specifier, "module load started");

        self.runtime.spawn(async move {
            // A panicking loader still owes the system a completion.
            let result = AssertUnwindSafe(pending)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(LoadError::Abandoned(specifier.clone())));
            // The receiver only goes away with the system itself.
            let _ = tx.send(LoadCompletion {
                target,
                specifier,
                result,
            });
        });
        Some(instance)
    }

    /// Record a module whose implementation is already resolved and stage it
    /// right away, skipping the loader.
    pub(crate) fn create_resolved(
        &mut self,
        entity: Entity,
        definition: ModuleDefinition,
        implementation: Arc<ModuleImplementation>,
    ) -> Option<InstanceId> {
        let key = *self.by_entity.get(&entity)?;
        let component = self.components.get_mut(&key)?;
        let instance = component.pool.push_pending(definition);
        self.add_resolved(
            QueuedInstance {
                component: key,
                entity,
                instance,
            },
            implementation,
        );
        Some(instance)
    }

    /// Construct a resolved module, apply its attributes, and stage it.
    ///
    /// If the component or the pending slot is gone, nothing is constructed.
    fn add_resolved(&mut self, target: QueuedInstance, implementation: Arc<ModuleImplementation>) {
        let Some(slot) = self
            .components
            .get_mut(&target.component)
            .and_then(|c| c.pool.get_mut(target.instance))
        else {
            debug!(
                entity = %target.entity,
                specifier = implementation.specifier(),
                "discarding resolved module: target no longer exists"
            );
            return;
        };
        if slot.state() != InstanceState::Pending {
            return;
        }

        let (attributes, rejected) =
            Attributes::from_raw(Arc::clone(implementation.schema()), &slot.definition().attributes);
        let script = implementation.construct();
        slot.stage(LiveInstance {
            implementation,
            script,
            attributes,
            initialized: false,
            post_initialized: false,
        });
        let specifier = slot.specifier().to_string();
        self.queue.stage_for_activation(target);
        trace!(entity = %target.entity, instance = %target.instance, specifier, "module staged");

        for source in rejected {
            self.sink.report(ScriptError::AttributeValidation {
                entity: target.entity,
                specifier: specifier.clone(),
                source,
            });
        }
    }

    /// Retire a module instance.
    ///
    /// A constructed instance is marked `Retiring`, stops receiving update
    /// calls at once, and is destroyed at the next retirement flush. A
    /// pending one is dropped before it is ever constructed. Removing the
    /// same instance again is a no-op that returns `false`.
    pub fn remove_module(&mut self, entity: Entity, instance: InstanceId) -> bool {
        let Some(&key) = self.by_entity.get(&entity) else {
            return false;
        };
        let Some(component) = self.components.get_mut(&key) else {
            return false;
        };
        let Some(slot) = component.pool.get_mut(instance) else {
            return false;
        };

        match slot.state() {
            InstanceState::Pending => {
                component.pool.remove(instance);
                debug!(%entity, %instance, "pending module dropped");
                true
            }
            InstanceState::Staged | InstanceState::Active => {
                slot.advance(InstanceState::Retiring);
                self.queue.stage_for_retirement(QueuedInstance {
                    component: key,
                    entity,
                    instance,
                });
                debug!(%entity, %instance, "module retiring");
                true
            }
            InstanceState::Retiring | InstanceState::Destroyed => false,
        }
    }

    /// Enable or disable one module instance. A disabled instance is skipped
    /// by every hook except `destroy`; a disabled staged instance waits in
    /// the activation queue until enabled.
    pub fn set_module_enabled(&mut self, entity: Entity, instance: InstanceId, enabled: bool) -> bool {
        match self
            .component_mut(entity)
            .and_then(|c| c.pool.get_mut(instance))
        {
            Some(slot) => {
                slot.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Destroy every component. Called at simulation shutdown and on drop.
    pub fn shutdown(&mut self) {
        let entities: Vec<Entity> = self.components.values().map(ScriptComponent::entity).collect();
        if entities.is_empty() {
            return;
        }
        for entity in &entities {
            self.remove_component(*entity);
        }
        self.commands.clear();
        info!(components = entities.len(), "script system shut down");
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Returns the script component of `entity`, if it has one.
    #[must_use]
    pub fn component(&self, entity: Entity) -> Option<&ScriptComponent> {
        self.by_entity.get(&entity).and_then(|k| self.components.get(k))
    }

    fn component_mut(&mut self, entity: Entity) -> Option<&mut ScriptComponent> {
        let key = self.by_entity.get(&entity)?;
        self.components.get_mut(key)
    }

    /// Whether `entity` has a script component.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.by_entity.contains_key(&entity)
    }

    /// Entities with a script component, in registration order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.components.values().map(ScriptComponent::entity).collect()
    }

    /// Number of live script components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns the lifecycle state of one instance on `entity`.
    #[must_use]
    pub fn instance_state(&self, entity: Entity, instance: InstanceId) -> Option<InstanceState> {
        self.component(entity)?.state_of(instance)
    }

    /// Loads started whose completions have not been applied yet.
    #[must_use]
    pub fn loads_in_flight(&self) -> usize {
        self.loads_in_flight
    }

    /// Returns a reference to the activation queue.
    #[must_use]
    pub fn queue(&self) -> &ActivationQueue {
        &self.queue
    }

    // ── Flushes and passes ──────────────────────────────────────────────

    /// Apply load completions that have arrived since the last flush.
    fn pump_completions(&mut self) {
        let limit = match self.config.max_completions_per_flush {
            0 => usize::MAX,
            n => n,
        };
        let mut applied = 0;
        while applied < limit {
            let Ok(completion) = self.completions_rx.try_recv() else {
                break;
            };
            applied += 1;
            self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
            self.apply_completion(completion);
        }
    }

    fn apply_completion(&mut self, completion: LoadCompletion) {
        let LoadCompletion {
            target,
            specifier,
            result,
        } = completion;
        match result {
            Ok(implementation) => self.add_resolved(target, implementation),
            Err(source) => {
                let still_wanted = self
                    .components
                    .get_mut(&target.component)
                    .and_then(|c| c.pool.remove(target.instance))
                    .is_some();
                if still_wanted {
                    self.sink.report(ScriptError::Load {
                        entity: target.entity,
                        source,
                    });
                } else {
                    debug!(entity = %target.entity, specifier, "ignoring failed load for removed target");
                }
            }
        }
    }

    /// Run `initialize` on every activatable staged instance, then
    /// `postInitialize` on each, then mark them `Active`.
    ///
    /// Entries whose component or instance is disabled are carried over to
    /// the next flush.
    fn flush_activations(&mut self) {
        let staged = self.queue.take_activations();
        if staged.is_empty() {
            return;
        }

        let mut batch = Vec::with_capacity(staged.len());
        let mut carried = Vec::new();
        for entry in staged {
            let Some(component) = self.components.get(&entry.component) else {
                continue;
            };
            let Some(slot) = component.pool.get(entry.instance) else {
                continue;
            };
            if slot.state() != InstanceState::Staged || slot.is_faulted() {
                continue;
            }
            if component.enabled() && slot.enabled() {
                batch.push(entry);
            } else {
                carried.push(entry);
            }
        }

        for entry in &batch {
            self.run_once(entry, Hook::Initialize);
        }
        for entry in &batch {
            if self.run_once(entry, Hook::PostInitialize)
                && let Some(component) = self.components.get_mut(&entry.component)
            {
                component.mark_initialized();
                if let Some(slot) = component.pool.get_mut(entry.instance) {
                    slot.advance(InstanceState::Active);
                }
            }
        }

        trace!(activated = batch.len(), carried = carried.len(), "activation flush");
        self.queue.requeue_activations(carried);
    }

    /// Run a one-shot hook (`initialize` / `postInitialize`) unless it has
    /// already run for this instance. Returns `true` if the instance is
    /// healthy and has completed the hook.
    fn run_once(&mut self, entry: &QueuedInstance, hook: Hook) -> bool {
        let catch_panics = self.config.catch_panics;
        let Some(slot) = self
            .components
            .get_mut(&entry.component)
            .and_then(|c| c.pool.get_mut(entry.instance))
        else {
            return false;
        };
        if slot.is_faulted() {
            return false;
        }

        let already = slot.live_mut().is_some_and(|live| match hook {
            Hook::Initialize => live.initialized,
            _ => live.post_initialized,
        });
        if already {
            return true;
        }

        let outcome = slot.invoke(entry.entity, hook, 0.0, &mut self.commands, catch_panics);
        if let Some(live) = slot.live_mut() {
            match hook {
                Hook::Initialize => live.initialized = true,
                _ => live.post_initialized = true,
            }
        }
        match outcome {
            Ok(()) => true,
            Err(source) => {
                slot.mark_faulted();
                let err = lifecycle_error(entry.entity, slot, hook, source);
                self.sink.report(err);
                false
            }
        }
    }

    /// Call a per-frame hook on every runnable instance of every enabled
    /// component, in registration order then module order.
    fn run_pass(&mut self, hook: Hook, dt: f64) {
        let catch_panics = self.config.catch_panics;
        for component in self.components.values_mut() {
            if !component.enabled() {
                continue;
            }
            let entity = component.entity();
            for instance in component.pool.runnable() {
                let Some(slot) = component.pool.get_mut(instance) else {
                    continue;
                };
                if let Err(source) = slot.invoke(entity, hook, dt, &mut self.commands, catch_panics) {
                    slot.mark_faulted();
                    self.sink.report(lifecycle_error(entity, slot, hook, source));
                }
            }
        }
    }

    /// Destroy every instance retired since the last retirement flush and
    /// drop it from its component.
    fn flush_retirements(&mut self) {
        let retiring = self.queue.take_retirements();
        for entry in retiring {
            let Some(component) = self.components.get_mut(&entry.component) else {
                continue;
            };
            if component.state_of(entry.instance) != Some(InstanceState::Retiring) {
                continue;
            }
            let Some(mut slot) = component.pool.remove(entry.instance) else {
                continue;
            };
            self.destroy_slot(entry.entity, &mut slot);
            trace!(entity = %entry.entity, instance = %entry.instance, "module destroyed");
        }
    }

    /// Call `destroy` on a constructed slot and mark it `Destroyed`.
    fn destroy_slot(&mut self, entity: Entity, slot: &mut ModuleSlot) {
        if !slot.advance(InstanceState::Destroyed) {
            return;
        }
        if let Err(source) = slot.invoke(entity, Hook::Destroy, 0.0, &mut self.commands, self.config.catch_panics) {
            self.sink.report(lifecycle_error(entity, slot, Hook::Destroy, source));
        }
    }

    /// Apply every queued command, including ones queued while applying.
    fn apply_commands(&mut self) {
        while !self.commands.is_empty() {
            let batch = std::mem::take(&mut self.commands);
            for command in batch {
                self.apply_command(command);
            }
        }
    }

    fn apply_command(&mut self, command: ScriptCommand) {
        trace!(?command, "applying script command");
        match command {
            ScriptCommand::AddModule { entity, definition } => {
                self.create(entity, definition);
            }
            ScriptCommand::RemoveModule { entity, instance } => {
                self.remove_module(entity, instance);
            }
            ScriptCommand::SetModuleEnabled {
                entity,
                instance,
                enabled,
            } => {
                self.set_module_enabled(entity, instance, enabled);
            }
            ScriptCommand::SetComponentEnabled { entity, enabled } => {
                self.set_enabled(entity, enabled);
            }
            ScriptCommand::RemoveComponent { entity } => {
                self.remove_component(entity);
            }
        }
    }

    /// Run every phase of one frame without a scheduler.
    pub fn frame(&mut self, frame: FrameInfo) {
        for phase in Phase::ALL {
            self.run_phase(phase, frame);
        }
    }
}

fn lifecycle_error(entity: Entity, slot: &ModuleSlot, hook: Hook, source: anyhow::Error) -> ScriptError {
    ScriptError::Lifecycle {
        entity,
        specifier: slot.specifier().to_string(),
        instance: slot.id(),
        hook,
        source,
    }
}

impl FrameSystem for ScriptSystem {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run_phase(&mut self, phase: Phase, frame: FrameInfo) {
        match phase {
            Phase::FlushActivations => {
                self.apply_commands();
                self.pump_completions();
                self.flush_activations();
                self.apply_commands();
            }
            Phase::Update => self.run_pass(Hook::Update, frame.dt),
            Phase::FlushUserRequestedChanges => self.apply_commands(),
            Phase::PostUpdate => self.run_pass(Hook::PostUpdate, frame.dt),
            Phase::FlushRetirements => {
                self.apply_commands();
                self.flush_retirements();
            }
        }
    }
}

impl Drop for ScriptSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ScriptSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptSystem")
            .field("components", &self.components.len())
            .field("loads_in_flight", &self.loads_in_flight)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
