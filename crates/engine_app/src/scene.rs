//! Scene files.
//!
//! A scene is a JSON list of named entities. Each entry either carries a
//! script component configuration or names another entry to clone its
//! script component from:
//!
//! ```json
//! {
//!   "name": "demo",
//!   "entities": [
//!     { "name": "spinner", "script": { "modules": [{ "moduleSpecifier": "spin.mjs" }] } },
//!     { "name": "spinner-copy", "cloneOf": "spinner" }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use engine_script::{ComponentConfig, ScriptSystem};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::world::World;

const DEMO_SCENE: &str = include_str!("../scenes/demo.json");

/// A named set of entities to spawn at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default)]
    pub name: String,
    pub entities: Vec<SceneEntity>,
}

/// One scene entity: a script component of its own, or a copy of
/// another entity's component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ComponentConfig>,
    /// Name of an earlier or later entry whose script component is cloned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_of: Option<String>,
}

impl Scene {
    /// Parse a scene from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid scene")
    }

    /// Read and parse a scene file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading scene {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing scene {}", path.display()))
    }

    /// The scene bundled with the binary.
    pub fn demo() -> Result<Self> {
        Self::from_json(DEMO_SCENE)
    }

    /// Spawn every entity into `world` and attach script components.
    ///
    /// Components are attached first and clones applied afterwards, so a
    /// clone may name any entry. A clone whose source has no script
    /// component is skipped; the script system reports it. Returns the
    /// number of entities that ended up with a script component.
    pub fn instantiate(&self, world: &mut World, system: &mut ScriptSystem) -> Result<usize> {
        let mut clones = Vec::new();
        for entry in &self.entities {
            if entry.script.is_some() && entry.clone_of.is_some() {
                bail!("entity `{}` has both a script and a clone source", entry.name);
            }
            let entity = world.spawn(&entry.name)?;
            if let Some(config) = &entry.script {
                system.add_component(entity, config.clone())?;
            }
            if let Some(source) = &entry.clone_of {
                clones.push((entity, source.as_str()));
            }
        }

        for (target, source_name) in clones {
            let Some(source) = world.lookup(source_name) else {
                bail!("clone source `{source_name}` is not in the scene");
            };
            match system.clone_component(source, target) {
                Ok(created) => debug!(source = source_name, %target, modules = created.len(), "cloned scene entity"),
                Err(err) => warn!(source = source_name, %target, "skipping clone: {err}"),
            }
        }

        Ok(system.len())
    }
}
