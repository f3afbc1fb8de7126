//! Named entities of the running scene.
//!
//! The [`World`] allocates entities and remembers the name each was given in
//! the scene file, so scene entries can refer to one another.

use std::collections::HashMap;

use anyhow::{Result, bail};
use engine_script::{Entity, EntityAllocator};

/// Entities of the running scene, addressable by name.
#[derive(Debug, Default)]
pub struct World {
    allocator: EntityAllocator,
    by_name: HashMap<String, Entity>,
    names: HashMap<Entity, String>,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an entity under a unique name.
    pub fn spawn(&mut self, name: &str) -> Result<Entity> {
        if self.by_name.contains_key(name) {
            bail!("duplicate entity name `{name}`");
        }
        let entity = self.allocator.allocate();
        self.by_name.insert(name.to_string(), entity);
        self.names.insert(entity, name.to_string());
        Ok(entity)
    }

    /// Returns the entity spawned under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.by_name.get(name).copied()
    }

    /// Returns the name `entity` was spawned under.
    #[must_use]
    pub fn name_of(&self, entity: Entity) -> Option<&str> {
        self.names.get(&entity).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }
}
