//! Double-buffered staging for activations and retirements.
//!
//! Producers push at any time. A flush swaps the staged buffer out and works
//! on its own copy, so anything staged while the flush runs (for example by
//! an `initialize` hook) lands in the fresh buffer and waits for the next
//! flush instead of changing the set being flushed.

use crate::component::ComponentKey;
use crate::entity::Entity;
use crate::instance::InstanceId;

/// Address of one instance inside one component lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueuedInstance {
    /// Component lifetime the instance belongs to.
    pub component: ComponentKey,
    pub entity: Entity,
    /// The instance within that component.
    pub instance: InstanceId,
}

/// Instances waiting for the next activation or retirement flush.
#[derive(Debug, Default)]
pub struct ActivationQueue {
    activations: Vec<QueuedInstance>,
    retirements: Vec<QueuedInstance>,
}

impl ActivationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a freshly constructed instance for the next activation flush.
    pub fn stage_for_activation(&mut self, entry: QueuedInstance) {
        self.activations.push(entry);
    }

    /// Stage a retiring instance for the next retirement flush.
    pub fn stage_for_retirement(&mut self, entry: QueuedInstance) {
        self.retirements.push(entry);
    }

    /// Take everything staged for activation, leaving an empty buffer.
    pub fn take_activations(&mut self) -> Vec<QueuedInstance> {
        std::mem::take(&mut self.activations)
    }

    /// Take everything staged for retirement, leaving an empty buffer.
    pub fn take_retirements(&mut self) -> Vec<QueuedInstance> {
        std::mem::take(&mut self.retirements)
    }

    /// Put back activations a flush could not apply yet. They go ahead of
    /// anything staged during the flush, keeping the original order.
    pub fn requeue_activations(&mut self, mut carried: Vec<QueuedInstance>) {
        if carried.is_empty() {
            return;
        }
        carried.append(&mut self.activations);
        self.activations = carried;
    }

    /// Number of instances staged for activation.
    #[must_use]
    pub fn pending_activations(&self) -> usize {
        self.activations.len()
    }

    /// Number of instances staged for retirement.
    #[must_use]
    pub fn pending_retirements(&self) -> usize {
        self.retirements.len()
    }
}
