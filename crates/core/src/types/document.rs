//! Schemaless remote documents.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use super::id::DocumentId;

/// A document read from (or written to) a collection.
///
/// Fields are kept as a JSON object so the cache layer stays agnostic of the
/// collection's schema; use [`Document::decode`] to get a typed view.
/// Serialises flat, with `id` next to the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    #[must_use]
    pub const fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Build a document from any serialisable value.
    ///
    /// A top-level `id` field in `value` is dropped; the document id wins.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` does not serialise to a JSON object.
    pub fn from_value<T: Serialize>(id: DocumentId, value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(mut fields) => {
                fields.remove("id");
                Ok(Self { id, fields })
            }
            other => Err(serde::ser::Error::custom(format!(
                "document body must be an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Shallow-merge `patch` over this document: every top-level key in the
    /// patch replaces the existing value.
    #[must_use]
    pub fn merged(&self, patch: &Map<String, Value>) -> Self {
        let mut fields = self.fields.clone();
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
        Self {
            id: self.id.clone(),
            fields,
        }
    }

    /// Look up a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Decode into a typed record; the document id is exposed as `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut object = self.fields.clone();
        object.insert("id".to_owned(), Value::String(self.id.as_str().to_owned()));
        serde_json::from_value(Value::Object(object))
    }
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
