//! Error kinds raised inside the script system.
//!
//! None of these escape a frame. They are handed to the
//! [`ErrorSink`](crate::report::ErrorSink) and the frame carries on.

use crate::entity::Entity;
use crate::instance::InstanceId;
use crate::script::Hook;

/// A specifier could not be resolved to a module implementation.
///
/// `Clone` so that one failed in-flight resolve can be handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// No module is known under this specifier.
    #[error("module not found: {0}")]
    NotFound(String),

    /// The loader found the module but could not produce an implementation.
    #[error("failed to load module {specifier}: {reason}")]
    Failed { specifier: String, reason: String },

    /// The loader task went away before producing a result.
    #[error("load of {0} was abandoned")]
    Abandoned(String),
}

impl LoadError {
    /// Returns the specifier the failed resolve was for.
    #[must_use]
    pub fn specifier(&self) -> &str {
        match self {
            Self::NotFound(s) | Self::Abandoned(s) => s,
            Self::Failed { specifier, .. } => specifier,
        }
    }
}

/// A raw attribute value did not fit the declared schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeError {
    /// The value's shape does not match the declared type.
    #[error("attribute `{name}` expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// The attribute is not declared by the schema.
    #[error("attribute `{0}` is not declared by the module schema")]
    Unknown(String),
}

/// A component-level request named the wrong entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// The entity carries no script component. Cloning from such an entity
    /// is the clone-without-source case.
    #[error("{0} has no script component")]
    Missing(Entity),

    /// The entity already carries a script component.
    #[error("{0} already has a script component")]
    AlreadyPresent(Entity),
}

impl ComponentError {
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::Missing(entity) | Self::AlreadyPresent(entity) => *entity,
        }
    }
}

/// Everything the script system reports to its sink.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A module failed to resolve. The component keeps its other modules.
    #[error("{entity}: {source}")]
    Load {
        entity: Entity,
        #[source]
        source: LoadError,
    },

    /// A supplied attribute value was rejected and replaced by its default.
    #[error("{entity} module {specifier}: {source}")]
    AttributeValidation {
        entity: Entity,
        specifier: String,
        #[source]
        source: AttributeError,
    },

    /// A clone request was aborted.
    #[error("clone aborted: {0}")]
    Clone(#[from] ComponentError),

    /// A lifecycle hook returned an error or panicked.
    #[error("{entity} module {specifier} ({instance}) failed in {hook}: {source}")]
    Lifecycle {
        entity: Entity,
        specifier: String,
        instance: InstanceId,
        hook: Hook,
        #[source]
        source: anyhow::Error,
    },
}

impl ScriptError {
    /// Returns the entity the error concerns.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::Load { entity, .. }
            | Self::AttributeValidation { entity, .. }
            | Self::Lifecycle { entity, .. } => *entity,
            Self::Clone(err) => err.entity(),
        }
    }

    /// Non-fatal reports are logged as warnings rather than errors.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::AttributeValidation { .. })
    }
}
