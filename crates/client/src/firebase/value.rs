//! JSON to Firestore typed value encoding and back.
//!
//! Firestore wraps every value in a single-key object naming its type
//! (`{"stringValue": "a"}`, `{"integerValue": "3"}`, ...). Documents are kept
//! as plain JSON everywhere else, so values are converted at the REST
//! boundary only. RFC 3339 strings are stored as timestamps so date fields
//! sort and compare natively; timestamps decode back to RFC 3339 strings.

use chrono::{DateTime, SecondsFormat, Utc};
use packup_core::{Document, DocumentId};
use serde_json::{Map, Number, Value, json};

use crate::providers::StoreError;

/// Encode a JSON value as a Firestore value.
pub fn encode(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => n.as_i64().map_or_else(
            || json!({ "doubleValue": n.as_f64() }),
            |i| json!({ "integerValue": i.to_string() }),
        ),
        Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => {
            json!({ "timestampValue": s })
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode).collect::<Vec<_>>() } })
        }
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

/// Encode every field of a document body.
pub fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode(value)))
        .collect()
}

/// Decode a Firestore value.
///
/// # Errors
///
/// Returns [`StoreError::Codec`] for unknown or malformed value types.
pub fn decode(value: &Value) -> Result<Value, StoreError> {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Err(codec(format!("expected a typed value, got {value}")));
    };

    match (kind.as_str(), inner) {
        ("nullValue", _) => Ok(Value::Null),
        ("booleanValue", Value::Bool(b)) => Ok(Value::Bool(*b)),
        ("integerValue", Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| codec(format!("bad integerValue {s:?}: {e}"))),
        ("integerValue", Value::Number(n)) => Ok(Value::Number(n.clone())),
        ("doubleValue", Value::Number(n)) => Ok(Value::Number(n.clone())),
        // NaN and infinities are sent as strings and have no JSON form.
        ("doubleValue", Value::String(_)) => Ok(Value::Null),
        ("timestampValue", Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| {
                Value::String(
                    t.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                )
            })
            .map_err(|e| codec(format!("bad timestampValue {s:?}: {e}"))),
        ("stringValue" | "referenceValue" | "bytesValue", Value::String(s)) => {
            Ok(Value::String(s.clone()))
        }
        ("geoPointValue", Value::Object(point)) => {
            let coordinate = |name: &str| {
                point
                    .get(name)
                    .and_then(Value::as_f64)
                    .and_then(Number::from_f64)
                    .map_or(Value::from(0), Value::Number)
            };
            Ok(json!({ "latitude": coordinate("latitude"), "longitude": coordinate("longitude") }))
        }
        ("arrayValue", Value::Object(array)) => array
            .get("values")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ("mapValue", Value::Object(map)) => match map.get("fields") {
            Some(Value::Object(fields)) => decode_fields(fields).map(Value::Object),
            _ => Ok(Value::Object(Map::new())),
        },
        (kind, _) => Err(codec(format!("unsupported value type {kind}"))),
    }
}

/// Decode every field of a Firestore `fields` object.
///
/// # Errors
///
/// Returns the first field that fails to decode.
pub fn decode_fields(fields: &Map<String, Value>) -> Result<Map<String, Value>, StoreError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode(value)?)))
        .collect()
}

/// A REST document resource with its `updateTime`.
///
/// # Errors
///
/// Returns [`StoreError::Codec`] if the resource has no name or its fields
/// do not decode.
pub fn decode_document(resource: &Value) -> Result<(Document, String), StoreError> {
    let name = resource
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| codec("document without a name".to_string()))?;
    let id = name.rsplit('/').next().unwrap_or(name);

    let fields = match resource.get("fields") {
        Some(Value::Object(fields)) => decode_fields(fields)?,
        _ => Map::new(),
    };
    let update_time = resource
        .get("updateTime")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok((Document::new(DocumentId::new(id), fields), update_time))
}

const fn codec(message: String) -> StoreError {
    StoreError::Codec(message)
}
