//! Module definitions and the component configuration that carries them.
//!
//! These are the serialisable shapes: what a scene file stores, what
//! `add_component` consumes, and what cloning produces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn enabled_by_default() -> bool {
    true
}

/// Static description of one module to attach to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    /// Opaque string handed to the module loader.
    pub module_specifier: String,
    /// Whether the module may activate once loaded.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Raw attribute values, validated once the module's schema is known.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ModuleDefinition {
    /// A definition with no attribute values.
    #[must_use]
    pub fn new(specifier: impl Into<String>) -> Self {
        Self {
            module_specifier: specifier.into(),
            enabled: true,
            attributes: Map::new(),
        }
    }

    /// Set one raw attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Replace all raw attribute values.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn specifier(&self) -> &str {
        &self.module_specifier
    }
}

/// Configuration of one script component: its enabled flag and its modules
/// in call order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

impl ComponentConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, module: ModuleDefinition) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            modules: Vec::new(),
        }
    }
}
