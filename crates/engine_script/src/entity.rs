//! Entity identity as seen by the script system.
//!
//! The scene graph that owns entities lives outside this crate. All the
//! script system needs is a stable, hashable, ordered identifier it can key
//! components by and report in diagnostics.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// An opaque entity identifier.
///
/// Zero is never a valid id, so `Option<Entity>` costs nothing extra and an
/// attribute holding a null entity reference maps cleanly onto `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(NonZeroU64);

impl Entity {
    /// Wrap a raw id. Returns `None` for zero.
    #[must_use]
    pub const fn try_from_raw(id: u64) -> Option<Self> {
        match NonZeroU64::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Wrap a raw id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is zero. Use [`Entity::try_from_raw`] for untrusted input.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => panic!("entity id 0 is reserved"),
        }
    }

    /// Returns the raw `u64` identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Hands out monotonically increasing entity ids, starting at 1.
///
/// Allocation takes `&self` so one allocator can be shared between the
/// simulation thread and loader tasks.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: AtomicU64,
}

impl EntityAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh entity.
    pub fn allocate(&self) -> Entity {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Entity::from_raw(id)
    }

    /// Returns the number of entities allocated so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
