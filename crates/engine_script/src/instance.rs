//! Module instances and the per-component pool that owns them.
//!
//! A slot is created the moment a module is requested, before its
//! implementation has resolved, so that the pool's order always matches the
//! order modules were requested in rather than the order loads happened to
//! finish.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use uuid::Uuid;

use crate::attribute::Attributes;
use crate::definition::ModuleDefinition;
use crate::entity::Entity;
use crate::loader::ModuleImplementation;
use crate::script::{Hook, Script, ScriptCommand, ScriptContext};

/// Unique id of one module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a module instance. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceState {
    /// Load in flight; nothing constructed yet.
    Pending,
    /// Constructed with attributes applied; waiting for an activation flush.
    Staged,
    /// Receiving per-frame update calls.
    Active,
    /// Marked for removal; waiting for a retirement flush.
    Retiring,
    /// Terminal.
    Destroyed,
}

/// The constructed half of a slot.
pub(crate) struct LiveInstance {
    pub(crate) implementation: Arc<ModuleImplementation>,
    pub(crate) script: Box<dyn Script>,
    pub(crate) attributes: Attributes,
    pub(crate) initialized: bool,
    pub(crate) post_initialized: bool,
}

/// One module attachment: the definition it came from, its state, and the
/// live instance once constructed.
pub struct ModuleSlot {
    id: InstanceId,
    definition: ModuleDefinition,
    state: InstanceState,
    enabled: bool,
    faulted: bool,
    live: Option<LiveInstance>,
}

impl ModuleSlot {
    fn pending(definition: ModuleDefinition) -> Self {
        Self {
            id: InstanceId::new(),
            enabled: definition.enabled,
            definition,
            state: InstanceState::Pending,
            faulted: false,
            live: None,
        }
    }

    /// Returns the id the slot keeps for its whole life.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// The definition this slot was requested with.
    #[must_use]
    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    /// Returns the specifier the module was requested under.
    #[must_use]
    pub fn specifier(&self) -> &str {
        self.definition.specifier()
    }

    /// Whether this module receives per-frame hooks.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// A hook of this instance failed; it receives no further calls other
    /// than `destroy`.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Typed attributes, once constructed.
    #[must_use]
    pub fn attributes(&self) -> Option<&Attributes> {
        self.live.as_ref().map(|l| &l.attributes)
    }

    /// The resolved implementation, once constructed.
    #[must_use]
    pub fn implementation(&self) -> Option<&Arc<ModuleImplementation>> {
        self.live.as_ref().map(|l| &l.implementation)
    }

    /// Whether per-frame hooks should be called this pass.
    pub(crate) fn is_runnable(&self) -> bool {
        self.state == InstanceState::Active && self.enabled && !self.faulted
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn mark_faulted(&mut self) {
        self.faulted = true;
    }

    pub(crate) fn live_mut(&mut self) -> Option<&mut LiveInstance> {
        self.live.as_mut()
    }

    /// `Pending → Staged`.
    pub(crate) fn stage(&mut self, live: LiveInstance) {
        debug_assert_eq!(self.state, InstanceState::Pending);
        self.live = Some(live);
        self.advance(InstanceState::Staged);
    }

    /// Move to `next` if that is forward of the current state.
    ///
    /// Returns `false` (and changes nothing) for a backward or repeated move.
    pub(crate) fn advance(&mut self, next: InstanceState) -> bool {
        if next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    /// Call one hook on the live instance.
    ///
    /// A slot with nothing constructed has no hooks and succeeds trivially.
    /// With `catch_panics`, a panic inside the hook is turned into an error.
    pub(crate) fn invoke(
        &mut self,
        entity: Entity,
        hook: Hook,
        dt: f64,
        commands: &mut Vec<ScriptCommand>,
        catch_panics: bool,
    ) -> anyhow::Result<()> {
        let id = self.id;
        let Some(LiveInstance {
            implementation,
            script,
            attributes,
            ..
        }) = self.live.as_mut()
        else {
            return Ok(());
        };

        let mut ctx = ScriptContext::new(entity, id, implementation.specifier(), attributes, commands);
        let mut run = || match hook {
            Hook::Initialize => script.initialize(&mut ctx),
            Hook::PostInitialize => script.post_initialize(&mut ctx),
            Hook::Update => script.update(&mut ctx, dt),
            Hook::PostUpdate => script.post_update(&mut ctx, dt),
            Hook::Destroy => script.destroy(&mut ctx),
        };

        if !catch_panics {
            return run();
        }
        match std::panic::catch_unwind(AssertUnwindSafe(run)) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }
}

impl std::fmt::Debug for ModuleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSlot")
            .field("id", &self.id)
            .field("specifier", &self.definition.module_specifier)
            .field("state", &self.state)
            .field("enabled", &self.enabled)
            .field("faulted", &self.faulted)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Ordered module slots of one component. Order is call order.
#[derive(Debug, Default)]
pub struct InstancePool {
    slots: Vec<ModuleSlot>,
}

impl InstancePool {
    /// Append a `Pending` slot for a definition and return its id.
    pub(crate) fn push_pending(&mut self, definition: ModuleDefinition) -> InstanceId {
        let slot = ModuleSlot::pending(definition);
        let id = slot.id;
        self.slots.push(slot);
        id
    }

    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<&ModuleSlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut ModuleSlot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    /// Drop a slot from the pool.
    pub(crate) fn remove(&mut self, id: InstanceId) -> Option<ModuleSlot> {
        let index = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(index))
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, ModuleSlot> {
        self.slots.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleSlot> {
        self.slots.iter()
    }

    /// Ids of the instances eligible for per-frame hooks, in call order.
    pub(crate) fn runnable(&self) -> Vec<InstanceId> {
        self.slots
            .iter()
            .filter(|s| s.is_runnable())
            .map(|s| s.id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots in a given state.
    #[must_use]
    pub fn count(&self, state: InstanceState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeSchema;

    struct Boom;
    impl Script for Boom {
        fn update(&mut self, _ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
            panic!("boom");
        }
        fn post_update(&mut self, _ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
            anyhow::bail!("refused")
        }
    }

    fn staged(pool: &mut InstancePool, specifier: &str) -> InstanceId {
        let id = pool.push_pending(ModuleDefinition::new(specifier));
        let implementation = Arc::new(ModuleImplementation::new(specifier, || Boom));
        let (attributes, _) = Attributes::from_raw(Arc::new(AttributeSchema::new()), &Default::default());
        pool.get_mut(id).unwrap().stage(LiveInstance {
            script: implementation.construct(),
            implementation,
            attributes,
            initialized: false,
            post_initialized: false,
        });
        id
    }

    #[test]
    fn test_pool_preserves_request_order() {
        let mut pool = InstancePool::default();
        let a = pool.push_pending(ModuleDefinition::new("a"));
        let b = pool.push_pending(ModuleDefinition::new("b"));
        let order: Vec<_> = pool.iter().map(ModuleSlot::id).collect();
        assert_eq!(order, vec![a, b]);
        assert_eq!(pool.count(InstanceState::Pending), 2);
    }

    #[test]
    fn test_state_never_regresses() {
        let mut pool = InstancePool::default();
        let id = staged(&mut pool, "a");
        let slot = pool.get_mut(id).unwrap();
        assert!(slot.advance(InstanceState::Active));
        assert!(!slot.advance(InstanceState::Staged));
        assert!(!slot.advance(InstanceState::Active));
        assert_eq!(slot.state(), InstanceState::Active);
        assert!(slot.advance(InstanceState::Retiring));
        assert!(!slot.is_runnable());
    }

    #[test]
    fn test_runnable_requires_active_enabled_and_healthy() {
        let mut pool = InstancePool::default();
        let a = staged(&mut pool, "a");
        let b = staged(&mut pool, "b");
        let c = staged(&mut pool, "c");
        for id in [a, b, c] {
            pool.get_mut(id).unwrap().advance(InstanceState::Active);
        }
        pool.get_mut(b).unwrap().set_enabled(false);
        pool.get_mut(c).unwrap().mark_faulted();
        assert_eq!(pool.runnable(), vec![a]);
    }

    #[test]
    fn test_invoke_turns_panics_and_errors_into_results() {
        let mut pool = InstancePool::default();
        let id = staged(&mut pool, "boom");
        let mut commands = Vec::new();
        let slot = pool.get_mut(id).unwrap();

        let err = slot
            .invoke(Entity::from_raw(1), Hook::Update, 0.1, &mut commands, true)
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        let err = slot
            .invoke(Entity::from_raw(1), Hook::PostUpdate, 0.1, &mut commands, true)
            .unwrap_err();
        assert_eq!(err.to_string(), "refused");

        assert!(slot.invoke(Entity::from_raw(1), Hook::Initialize, 0.0, &mut commands, true).is_ok());
    }

    #[test]
    fn test_pending_slot_has_no_hooks() {
        let mut pool = InstancePool::default();
        let id = pool.push_pending(ModuleDefinition::new("a"));
        let mut commands = Vec::new();
        let slot = pool.get_mut(id).unwrap();
        assert!(slot.invoke(Entity::from_raw(1), Hook::Update, 0.1, &mut commands, true).is_ok());
        assert!(slot.attributes().is_none());
    }
}
