//! Clone engine: reproduce a component's configuration on another entity.
//!
//! Cloning copies configuration, never live instances. Modules that are
//! still loading are re-requested from their original definitions, so the
//! clone's load proceeds independently. Modules that have resolved are
//! re-created from their current attribute values and the implementation
//! already in hand, so the loader is not asked again.

use std::sync::Arc;

use tracing::{debug, error};

use crate::definition::{ComponentConfig, ModuleDefinition};
use crate::entity::Entity;
use crate::error::{ComponentError, ScriptError};
use crate::instance::{InstanceId, InstanceState, ModuleSlot};
use crate::loader::ModuleImplementation;
use crate::system::ScriptSystem;

/// How one module of the source is reproduced.
enum ClonedModule {
    /// Still loading on the source: resolve again from the original definition.
    Unresolved(ModuleDefinition),
    /// Already constructed: reuse the implementation with current values.
    Resolved {
        definition: ModuleDefinition,
        implementation: Arc<ModuleImplementation>,
    },
}

impl ClonedModule {
    /// `None` for instances on their way out.
    fn from_slot(slot: &ModuleSlot) -> Option<Self> {
        match slot.state() {
            InstanceState::Pending => Some(Self::Unresolved(ModuleDefinition {
                enabled: slot.enabled(),
                ..slot.definition().clone()
            })),
            InstanceState::Staged | InstanceState::Active => {
                let attributes = slot.attributes()?;
                let implementation = Arc::clone(slot.implementation()?);
                Some(Self::Resolved {
                    definition: ModuleDefinition {
                        module_specifier: slot.specifier().to_string(),
                        enabled: slot.enabled(),
                        attributes: attributes.to_raw(),
                    },
                    implementation,
                })
            }
            InstanceState::Retiring | InstanceState::Destroyed => None,
        }
    }

    fn definition(&self) -> &ModuleDefinition {
        match self {
            Self::Unresolved(definition) | Self::Resolved { definition, .. } => definition,
        }
    }
}

impl ScriptSystem {
    fn clone_plan(&self, entity: Entity) -> Option<(bool, Vec<ClonedModule>)> {
        let component = self.component(entity)?;
        let modules = component.modules().filter_map(ClonedModule::from_slot).collect();
        Some((component.enabled(), modules))
    }

    /// The configuration an entity's component would be recreated from:
    /// original definitions for loading modules, current attribute values
    /// for resolved ones.
    #[must_use]
    pub fn snapshot(&self, entity: Entity) -> Option<ComponentConfig> {
        let (enabled, modules) = self.clone_plan(entity)?;
        Some(ComponentConfig {
            enabled,
            modules: modules.iter().map(|m| m.definition().clone()).collect(),
        })
    }

    /// Give `target` a new script component equivalent to `source`'s.
    ///
    /// The new modules go through the normal create / add-resolved pipeline
    /// and activate at a later flush. Returns the new instance ids in module
    /// order.
    ///
    /// # Errors
    ///
    /// [`ComponentError::Missing`] if `source` has no script component,
    /// [`ComponentError::AlreadyPresent`] if `target` already has one. Both
    /// are also reported to the error sink; nothing is changed.
    pub fn clone_component(&mut self, source: Entity, target: Entity) -> Result<Vec<InstanceId>, ComponentError> {
        let Some((enabled, modules)) = self.clone_plan(source) else {
            return Err(self.reject_clone(ComponentError::Missing(source)));
        };
        if self.contains(target) {
            return Err(self.reject_clone(ComponentError::AlreadyPresent(target)));
        }

        self.add_component(target, ComponentConfig::new())
            .map_err(|err| self.reject_clone(err))?;
        self.set_enabled(target, enabled);

        let mut created = Vec::with_capacity(modules.len());
        for module in modules {
            let id = match module {
                ClonedModule::Unresolved(definition) => self.create(target, definition),
                ClonedModule::Resolved {
                    definition,
                    implementation,
                } => self.create_resolved(target, definition, implementation),
            };
            created.extend(id);
        }

        debug!(%source, %target, modules = created.len(), "script component cloned");
        Ok(created)
    }

    fn reject_clone(&mut self, err: ComponentError) -> ComponentError {
        error!(entity = %err.entity(), "rejected script component clone: {err}");
        self.report(ScriptError::Clone(err.clone()));
        err
    }
}
