//! The per-entity script component.

use crate::entity::Entity;
use crate::instance::{InstanceId, InstancePool, InstanceState, ModuleSlot};

/// Identity of one component lifetime.
///
/// Keys are handed out in registration order and never reused, so a load
/// completion addressed to a component that has since been removed (even if
/// the same entity got a fresh component) simply finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKey(pub(crate) u64);

/// Script component of one entity: an enabled flag and its module slots.
#[derive(Debug)]
pub struct ScriptComponent {
    entity: Entity,
    key: ComponentKey,
    enabled: bool,
    initialized: bool,
    pub(crate) pool: InstancePool,
}

impl ScriptComponent {
    pub(crate) fn new(entity: Entity, key: ComponentKey, enabled: bool) -> Self {
        Self {
            entity,
            key,
            enabled,
            initialized: false,
            pool: InstancePool::default(),
        }
    }

    /// Returns the entity this component is attached to.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Returns the key of this component lifetime.
    #[must_use]
    pub fn key(&self) -> ComponentKey {
        self.key
    }

    /// Whether the component's modules receive `update` and `postUpdate`.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether at least one activation flush has run for this component.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Module slots in call order, including ones still loading.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleSlot> {
        self.pool.iter()
    }

    /// Returns the slot for `id`, if it is still in the pool.
    #[must_use]
    pub fn module(&self, id: InstanceId) -> Option<&ModuleSlot> {
        self.pool.get(id)
    }

    /// First slot loaded from `specifier`, if any.
    #[must_use]
    pub fn find(&self, specifier: &str) -> Option<&ModuleSlot> {
        self.pool.iter().find(|s| s.specifier() == specifier)
    }

    /// Returns the lifecycle state of instance `id`.
    #[must_use]
    pub fn state_of(&self, id: InstanceId) -> Option<InstanceState> {
        self.pool.get(id).map(ModuleSlot::state)
    }

    /// Number of module slots, including pending ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
