//! Attribute schemas and the validate/convert step between loosely typed
//! definition values and typed per-instance attributes.
//!
//! Raw values arrive as [`serde_json::Value`] (that is what a persisted
//! module definition carries). Once a module resolves, its
//! [`AttributeSchema`] converts each raw value into an [`AttributeValue`].
//! Conversion is strict: a JSON string is never read as a number, a float is
//! never read as an entity. A value that does not fit is replaced by the
//! declared default and the mismatch is reported as a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::error::AttributeError;

/// Declared type of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    Boolean,
    Number,
    String,
    /// A reference to another entity. JSON `null` is an empty reference.
    Entity,
    /// Any JSON value, passed through untouched.
    Json,
    /// A homogeneous list.
    List(Box<AttributeType>),
    /// A nested record with its own schema.
    Record(AttributeSchema),
}

impl AttributeType {
    /// Short human-readable name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Boolean => "boolean".into(),
            Self::Number => "number".into(),
            Self::String => "string".into(),
            Self::Entity => "entity".into(),
            Self::Json => "json".into(),
            Self::List(inner) => format!("list<{}>", inner.name()),
            Self::Record(_) => "record".into(),
        }
    }

    /// Convert a raw value into a typed one.
    ///
    /// `path` names the attribute in error messages; nested elements extend
    /// it (`waypoints[2]`, `spawn.rate`).
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::TypeMismatch`] if `raw` does not fit.
    pub fn coerce(&self, path: &str, raw: &Value) -> Result<AttributeValue, AttributeError> {
        let mismatch = || AttributeError::TypeMismatch {
            name: path.to_string(),
            expected: self.name(),
            found: json_kind(raw).to_string(),
        };

        match (self, raw) {
            (Self::Boolean, Value::Bool(b)) => Ok(AttributeValue::Boolean(*b)),
            (Self::Number, Value::Number(n)) => n.as_f64().map(AttributeValue::Number).ok_or_else(mismatch),
            (Self::String, Value::String(s)) => Ok(AttributeValue::String(s.clone())),
            (Self::Entity, Value::Null) => Ok(AttributeValue::Entity(None)),
            (Self::Entity, Value::Number(n)) => n
                .as_u64()
                .and_then(Entity::try_from_raw)
                .map(|e| AttributeValue::Entity(Some(e)))
                .ok_or_else(mismatch),
            (Self::Json, v) => Ok(AttributeValue::Json(v.clone())),
            (Self::List(inner), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| inner.coerce(&format!("{path}[{i}]"), item))
                .collect::<Result<Vec<_>, _>>()
                .map(AttributeValue::List),
            (Self::Record(schema), Value::Object(fields)) => {
                let mut out = BTreeMap::new();
                for (name, def) in schema.iter() {
                    let value = match fields.get(name) {
                        Some(raw) => def.ty.coerce(&format!("{path}.{name}"), raw)?,
                        None => def.default.clone(),
                    };
                    out.insert(name.to_string(), value);
                }
                Ok(AttributeValue::Record(out))
            }
            _ => Err(mismatch()),
        }
    }

    /// Returns `true` if an already-typed value fits this type.
    #[must_use]
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        match (self, value) {
            (Self::Boolean, AttributeValue::Boolean(_))
            | (Self::Number, AttributeValue::Number(_))
            | (Self::String, AttributeValue::String(_))
            | (Self::Entity, AttributeValue::Entity(_))
            | (Self::Json, AttributeValue::Json(_)) => true,
            (Self::List(inner), AttributeValue::List(items)) => items.iter().all(|v| inner.accepts(v)),
            (Self::Record(schema), AttributeValue::Record(fields)) => fields.iter().all(|(name, v)| {
                schema.get(name).is_some_and(|def| def.ty.accepts(v))
            }),
            _ => false,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A typed attribute value held by a live module instance.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Entity(Option<Entity>),
    Json(Value),
    List(Vec<AttributeValue>),
    Record(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Convert back to the raw form a module definition carries.
    #[must_use]
    pub fn to_raw(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::String(s) => Value::String(s.clone()),
            Self::Entity(e) => e.map_or(Value::Null, |e| Value::from(e.id())),
            Self::Json(v) => v.clone(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_raw).collect()),
            Self::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_raw()))
                    .collect(),
            ),
        }
    }
}

/// Declaration of one attribute: its type and the value used when the
/// definition omits it or supplies something that does not fit.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub ty: AttributeType,
    pub default: AttributeValue,
}

impl AttributeDef {
    #[must_use]
    pub fn boolean(default: bool) -> Self {
        Self {
            ty: AttributeType::Boolean,
            default: AttributeValue::Boolean(default),
        }
    }

    #[must_use]
    pub fn number(default: f64) -> Self {
        Self {
            ty: AttributeType::Number,
            default: AttributeValue::Number(default),
        }
    }

    #[must_use]
    pub fn string(default: impl Into<String>) -> Self {
        Self {
            ty: AttributeType::String,
            default: AttributeValue::String(default.into()),
        }
    }

    /// An entity reference, empty by default.
    #[must_use]
    pub fn entity() -> Self {
        Self {
            ty: AttributeType::Entity,
            default: AttributeValue::Entity(None),
        }
    }

    #[must_use]
    pub fn json(default: Value) -> Self {
        Self {
            ty: AttributeType::Json,
            default: AttributeValue::Json(default),
        }
    }

    /// A list of `item`, empty by default.
    #[must_use]
    pub fn list(item: AttributeType) -> Self {
        Self {
            ty: AttributeType::List(Box::new(item)),
            default: AttributeValue::List(Vec::new()),
        }
    }

    /// A nested record whose default is built from the nested defaults.
    #[must_use]
    pub fn record(schema: AttributeSchema) -> Self {
        let default = AttributeValue::Record(
            schema
                .iter()
                .map(|(name, def)| (name.to_string(), def.default.clone()))
                .collect(),
        );
        Self {
            ty: AttributeType::Record(schema),
            default,
        }
    }
}

/// The attribute schema a module implementation declares.
///
/// Declaration order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSchema {
    defs: Vec<(String, AttributeDef)>,
}

impl AttributeSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an attribute. A later declaration of the same name replaces
    /// the earlier one in place.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, def: AttributeDef) -> Self {
        let name = name.into();
        match self.defs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = def,
            None => self.defs.push((name, def)),
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeDef> {
        self.defs.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeDef)> {
        self.defs.iter().map(|(n, d)| (n.as_str(), d))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Typed attribute values of one live module instance.
#[derive(Debug, Clone)]
pub struct Attributes {
    schema: Arc<AttributeSchema>,
    values: BTreeMap<String, AttributeValue>,
}

impl Attributes {
    /// Apply raw definition values against a schema.
    ///
    /// Every declared attribute ends up with a value: the converted raw value
    /// when it fits, the default otherwise. Undeclared raw keys are ignored.
    /// The returned errors list each value that was rejected.
    #[must_use]
    pub fn from_raw(schema: Arc<AttributeSchema>, raw: &Map<String, Value>) -> (Self, Vec<AttributeError>) {
        let mut values = BTreeMap::new();
        let mut rejected = Vec::new();

        for (name, def) in schema.iter() {
            let value = match raw.get(name) {
                Some(raw_value) => def.ty.coerce(name, raw_value).unwrap_or_else(|err| {
                    rejected.push(err);
                    def.default.clone()
                }),
                None => def.default.clone(),
            };
            values.insert(name.to_string(), value);
        }

        for key in raw.keys().filter(|k| schema.get(k).is_none()) {
            tracing::trace!(attribute = %key, "ignoring undeclared attribute");
        }

        (Self { schema, values }, rejected)
    }

    /// Returns the schema the values were checked against.
    #[must_use]
    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    /// Returns a number attribute, or `None` if absent or of another type.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(AttributeValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(AttributeValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<Entity> {
        match self.values.get(name) {
            Some(AttributeValue::Entity(e)) => *e,
            _ => None,
        }
    }

    /// Overwrite one attribute.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is undeclared or the value does not fit its
    /// declared type. The stored value is left unchanged in that case.
    pub fn set(&mut self, name: &str, value: AttributeValue) -> Result<(), AttributeError> {
        let def = self
            .schema
            .get(name)
            .ok_or_else(|| AttributeError::Unknown(name.to_string()))?;
        if !def.ty.accepts(&value) {
            return Err(AttributeError::TypeMismatch {
                name: name.to_string(),
                expected: def.ty.name(),
                found: format!("{value:?}"),
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Read every current value back into raw definition form.
    #[must_use]
    pub fn to_raw(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_raw()))
            .collect()
    }
}
