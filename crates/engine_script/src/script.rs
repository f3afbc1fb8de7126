//! The contract a loaded module implements, and the context it is handed on
//! every lifecycle call.

use crate::attribute::Attributes;
use crate::definition::ModuleDefinition;
use crate::entity::Entity;
use crate::instance::InstanceId;

/// Names of the lifecycle hooks, used in reports and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Initialize,
    PostInitialize,
    Update,
    PostUpdate,
    Destroy,
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::PostInitialize => "postInitialize",
            Self::Update => "update",
            Self::PostUpdate => "postUpdate",
            Self::Destroy => "destroy",
        })
    }
}

/// Behaviour of one module instance.
///
/// Every hook is optional; the defaults do nothing. Hooks run synchronously
/// on the simulation thread. An `Err` (or a panic) is reported and the
/// instance is taken out of the call sequence; sibling instances are
/// unaffected.
///
/// `initialize` and `post_initialize` run exactly once per instance, before
/// its first `update`. `destroy` runs exactly once, for every instance that
/// was constructed.
#[allow(unused_variables)]
pub trait Script: 'static {
    fn initialize(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_initialize(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn update(&mut self, ctx: &mut ScriptContext<'_>, dt: f64) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_update(&mut self, ctx: &mut ScriptContext<'_>, dt: f64) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A structural change requested from inside a lifecycle hook.
///
/// Commands are queued while hooks run and applied by the script system at
/// the next flush point, never in the middle of a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    /// Attach another module to an entity's component.
    AddModule {
        entity: Entity,
        definition: ModuleDefinition,
    },
    /// Retire a module instance.
    RemoveModule { entity: Entity, instance: InstanceId },
    /// Enable or disable one module instance.
    SetModuleEnabled {
        entity: Entity,
        instance: InstanceId,
        enabled: bool,
    },
    /// Enable or disable a whole component.
    SetComponentEnabled { entity: Entity, enabled: bool },
    /// Remove a component and destroy all its instances.
    RemoveComponent { entity: Entity },
}

/// What a hook sees of the world: its own identity, its attributes, and a
/// queue for deferred structural changes.
#[derive(Debug)]
pub struct ScriptContext<'a> {
    entity: Entity,
    instance: InstanceId,
    specifier: &'a str,
    attributes: &'a mut Attributes,
    commands: &'a mut Vec<ScriptCommand>,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(
        entity: Entity,
        instance: InstanceId,
        specifier: &'a str,
        attributes: &'a mut Attributes,
        commands: &'a mut Vec<ScriptCommand>,
    ) -> Self {
        Self {
            entity,
            instance,
            specifier,
            attributes,
            commands,
        }
    }

    /// The entity this instance is attached to.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// This instance's id.
    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The specifier this instance was loaded from.
    #[must_use]
    pub fn specifier(&self) -> &str {
        self.specifier
    }

    /// Returns the instance's typed attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        self.attributes
    }

    /// Returns the instance's attributes for validated writes.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        self.attributes
    }

    /// Attach another module to this entity.
    pub fn add_module(&mut self, definition: ModuleDefinition) {
        self.commands.push(ScriptCommand::AddModule {
            entity: self.entity,
            definition,
        });
    }

    /// Retire this instance. It receives no further update calls once the
    /// request is applied and is destroyed at the next retirement flush.
    pub fn remove_self(&mut self) {
        self.commands.push(ScriptCommand::RemoveModule {
            entity: self.entity,
            instance: self.instance,
        });
    }

    /// Retire a sibling instance on the same entity.
    pub fn remove_module(&mut self, instance: InstanceId) {
        self.commands.push(ScriptCommand::RemoveModule {
            entity: self.entity,
            instance,
        });
    }

    /// Enable or disable this entity's whole script component.
    pub fn set_component_enabled(&mut self, enabled: bool) {
        self.commands.push(ScriptCommand::SetComponentEnabled {
            entity: self.entity,
            enabled,
        });
    }

    /// Remove this entity's script component.
    pub fn remove_component(&mut self) {
        self.commands.push(ScriptCommand::RemoveComponent { entity: self.entity });
    }

    /// Queue an arbitrary command, possibly targeting another entity.
    pub fn push_command(&mut self, command: ScriptCommand) {
        self.commands.push(command);
    }
}
