//! Core data models used throughout finder.
//!
//! Documents coming out of the primary store and going into the search index
//! are untyped JSON objects. They are kept as ordered maps so that fields the
//! transformers know nothing about pass through unchanged and in their
//! original order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the primary store's internal identifier.
pub const INTERNAL_ID_FIELD: &str = "_id";
/// Field holding the externally meaningful identifier (and, after
/// transformation, the index identifier).
pub const ID_FIELD: &str = "id";
/// Schema-version marker written by the primary store's object mapper.
pub const SCHEMA_VERSION_FIELD: &str = "__v";
/// Internal revision marker.
pub const REVISION_FIELD: &str = "_rev";

/// A document as stored in the primary store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDocument(pub Map<String, Value>);

impl RawDocument {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Parse a raw document from a JSON value. Anything but an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The externally meaningful identifier (`id`), if it is a string.
    pub fn external_id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The internal identifier, stringified. See [`stringify_id`].
    pub fn internal_id(&self) -> Option<String> {
        self.0.get(INTERNAL_ID_FIELD).and_then(stringify_id)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// A transformed, backend-ready document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDocument(pub Map<String, Value>);

impl IndexDocument {
    /// The identifier the backend stores this document under.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Render an internal identifier as a string.
///
/// Accepts plain strings, numbers and extended-JSON object ids
/// (`{"$oid": "..."}`). Returns `None` for anything else, including null.
pub fn stringify_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Result of a single transform attempt, as kept in the transform log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum TransformOutcome {
    Success,
    Error(String),
}

/// One line of the rolling transform log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformLogEntry {
    pub time: DateTime<Utc>,
    pub document: String,
    pub outcome: TransformOutcome,
}

impl TransformLogEntry {
    pub fn success(document: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            document: document.into(),
            outcome: TransformOutcome::Success,
        }
    }

    pub fn error(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            document: document.into(),
            outcome: TransformOutcome::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, TransformOutcome::Error(_))
    }
}

/// A change observed in the primary store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert {
        collection: String,
        document: RawDocument,
    },
    Update {
        collection: String,
        document: RawDocument,
    },
    /// Carries the internal identifier of the removed document.
    Delete { collection: String, id: String },
}

impl ChangeEvent {
    pub fn collection(&self) -> &str {
        match self {
            ChangeEvent::Insert { collection, .. }
            | ChangeEvent::Update { collection, .. }
            | ChangeEvent::Delete { collection, .. } => collection,
        }
    }
}
