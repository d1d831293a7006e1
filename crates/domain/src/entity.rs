//! Dynamic entity values returned by the query layer, and path navigation
//! over them.
//!
//! The service returns loosely-typed nested records. They are decoded into
//! the tagged [`Value`] type: every JSON object becomes an [`Entity`], every
//! array a [`Value::List`]. Protocol annotations (`@odata.*` keys) are split
//! off into the entity's [`Annotations`] slot and never appear as regular
//! properties, so path navigation only sees data fields.
//!
//! Navigation never mutates its input; errors name the exact prefix consumed.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use uuid::Uuid;

/// Name of the reserved identity property.
pub const ID_PROPERTY: &str = "Id";

/// Longest rendering of an offending value kept in a [`PathError`].
const MAX_RENDERED_VALUE: usize = 120;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while navigating an entity by path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    /// A segment was applied to a value that is not an entity.
    ///
    /// `consumed` is the dot-joined prefix that produced `found`.
    #[error("Path '{consumed}' evaluates to {found} which is not a valid domain object")]
    InvalidPath {
        consumed: String,
        found: String,
    },

    /// A segment named a property the entity does not have.
    ///
    /// `path` is the dot-joined prefix including the missing segment.
    #[error("There is no property with the specified path '{path}'")]
    PropertyNotFound { path: String },

    /// The resolved value exists but has the wrong shape for a typed accessor.
    #[error("Path '{path}' evaluates to {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: String,
    },
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single value inside an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// JSON `null`, or a property the service omitted.
    #[default]
    Null,
    Bool(bool),
    /// Any numeric literal, kept exact until an `as_*` accessor narrows it.
    Number(serde_json::Number),
    String(String),
    /// A nested object: a navigation target or complex value.
    Entity(Entity),
    /// A collection of values, usually entities.
    List(Vec<Value>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The string contents, or `None` for any other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean, or `None` for any other variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number as `i64`; `None` when it is fractional, out of range or
    /// not a number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// The number as `f64`, or `None` when the value is not a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// The nested entity, or `None` for any other variant.
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// The collection items, or `None` for any other variant.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Parses a GUID-valued string.
    pub fn as_uuid(&self) -> Option<Uuid> {
        self.as_str().and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Parses an `Edm.DateTimeOffset` string (RFC 3339).
    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        self.as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }

    /// Views a value already known to be a list of entities.
    ///
    /// This is a narrowing view for values obtained from a navigation
    /// property; a list containing anything other than entities is reported
    /// as [`PathError::TypeMismatch`] rather than silently filtered.
    pub fn as_entity_list(&self) -> Result<Vec<&Entity>, PathError> {
        entity_list(self, "")
    }

    /// Resolves `path` starting from this value. See [`Entity::resolve_path`].
    pub fn resolve_path(&self, path: &str) -> Result<&Value, PathError> {
        match self {
            Value::Entity(entity) => entity.resolve_path(path),
            other => Err(PathError::InvalidPath {
                consumed: String::new(),
                found: render(other),
            }),
        }
    }

    /// Converts back to plain JSON. Annotations are not emitted.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Entity(e) => e.to_json(),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Entity(_) => "entity",
            Value::List(_) => "list",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Entity(Entity::from(map)),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// Protocol annotations attached to an entity by the service.
///
/// Populated from `@odata.*` instance annotations and `Property@term`
/// property annotations. Not part of the entity's data properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub context: Option<String>,
    pub id: Option<String>,
    pub etag: Option<String>,
    pub type_name: Option<String>,
    pub edit_link: Option<String>,
    pub read_link: Option<String>,
    /// Annotations attached to individual properties, keyed by property name
    /// then by annotation term (e.g. `"odata.navigationLink"`).
    pub properties: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Instance annotations with no dedicated field, keyed by term.
    pub other: BTreeMap<String, serde_json::Value>,
}

impl Annotations {
    /// Whether the service attached no annotations at all.
    pub fn is_empty(&self) -> bool {
        *self == Annotations::default()
    }

    fn record_instance(&mut self, term: &str, value: serde_json::Value) {
        let text = value.as_str().map(str::to_owned);
        match term {
            "odata.context" => self.context = text,
            "odata.id" => self.id = text,
            "odata.etag" => self.etag = text,
            "odata.type" => self.type_name = text,
            "odata.editLink" => self.edit_link = text,
            "odata.readLink" => self.read_link = text,
            _ => {
                self.other.insert(term.to_owned(), value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A nested, dynamically keyed record representing one domain object or
/// complex value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    properties: BTreeMap<String, Value>,
    annotations: Annotations,
}

impl Entity {
    /// An entity with no properties and no annotations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a property, returning `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// The property called `name` (case-sensitive), if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Whether a property called `name` is present, even if null.
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Iterates over the properties sorted by name. Wire order is not kept.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties, annotations excluded.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the entity has no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Protocol annotations attached by the service.
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Reads the reserved `Id` property as a GUID.
    pub fn id(&self) -> Result<Uuid, PathError> {
        let value = self
            .get(ID_PROPERTY)
            .ok_or_else(|| PathError::PropertyNotFound {
                path: ID_PROPERTY.to_owned(),
            })?;
        value.as_uuid().ok_or_else(|| PathError::TypeMismatch {
            path: ID_PROPERTY.to_owned(),
            expected: "GUID",
            found: render(value),
        })
    }

    /// Resolves a `.`- or `/`-delimited property path.
    ///
    /// Every segment except the last must resolve to an entity; otherwise
    /// [`PathError::InvalidPath`] reports the prefix consumed so far and the
    /// offending value. A missing key yields [`PathError::PropertyNotFound`]
    /// naming the prefix up to and including that key.
    pub fn resolve_path(&self, path: &str) -> Result<&Value, PathError> {
        let mut consumed: Vec<&str> = Vec::new();
        let mut container = self;
        let mut current: Option<&Value> = None;

        for segment in path.split(|c| c == '.' || c == '/') {
            if let Some(value) = current {
                container = match value {
                    Value::Entity(entity) => entity,
                    other => {
                        return Err(PathError::InvalidPath {
                            consumed: consumed.join("."),
                            found: render(other),
                        })
                    }
                };
            }
            consumed.push(segment);
            current = Some(container.get(segment).ok_or_else(|| {
                PathError::PropertyNotFound {
                    path: consumed.join("."),
                }
            })?);
        }

        // `split` yields at least one segment, so the loop ran at least once.
        current.ok_or_else(|| PathError::PropertyNotFound {
            path: path.to_owned(),
        })
    }

    /// Resolves `path` and narrows the result to a list of entities.
    pub fn resolve_entity_list(&self, path: &str) -> Result<Vec<&Entity>, PathError> {
        entity_list(self.resolve_path(path)?, path)
    }

    /// Converts to a plain JSON object. Annotations are not emitted.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Entity {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut entity = Entity::default();
        for (key, value) in map {
            match key.split_once('@') {
                Some(("", term)) => entity.annotations.record_instance(term, value),
                Some((property, term)) => {
                    entity
                        .annotations
                        .properties
                        .entry(property.to_owned())
                        .or_default()
                        .insert(term.to_owned(), value);
                }
                None => {
                    entity.properties.insert(key, Value::from(value));
                }
            }
        }
        entity
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::deserialize(deserializer)?;
        Ok(Entity::from(map))
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Value::Entity(entity)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

fn entity_list<'a>(value: &'a Value, path: &str) -> Result<Vec<&'a Entity>, PathError> {
    let mismatch = || PathError::TypeMismatch {
        path: path.to_owned(),
        expected: "entity list",
        found: render(value),
    };
    let items = value.as_list().ok_or_else(mismatch)?;
    items
        .iter()
        .map(|item| item.as_entity().ok_or_else(mismatch))
        .collect()
}

/// Renders a value for diagnostics, bounded in length.
fn render(value: &Value) -> String {
    let text = match value {
        Value::Null => "null".to_owned(),
        other => format!("{} {}", other.kind(), other.to_json()),
    };
    if text.chars().count() > MAX_RENDERED_VALUE {
        let truncated: String = text.chars().take(MAX_RENDERED_VALUE).collect();
        format!("{truncated}…")
    } else {
        text
    }
}
