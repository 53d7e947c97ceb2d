//! Conversion of upstream JSON Schemas into lightweight argument validators.
//!
//! The conversion is intentionally lossy: `enum`, `oneOf`, formats and other
//! keywords are dropped, and anything unrecognized degrades to `Any`. The
//! aggregator is a passthrough; upstreams keep the canonical schema and
//! remain authoritative for rejecting malformed arguments.

use std::collections::HashMap;

use rmcp::model::JsonObject;
use serde_json::Value;

/// A structural validator derived from a subset of JSON Schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSchema {
    /// Anything passes. Used for unknown or missing `type`.
    Any,
    String,
    Number,
    Integer,
    Boolean,
    /// Array with a typed element validator.
    List(Box<ArgSchema>),
    /// Object with per-property validators. Missing and unknown keys pass.
    Object(HashMap<String, ArgSchema>),
    /// Object without declared properties: a map of string to any.
    Map,
}

/// Convert a JSON Schema object into an [`ArgSchema`].
///
/// Recognized forms:
/// - scalar `type`s (`string`, `number`, `integer`, `boolean`)
/// - `array` with scalar `items` (other item types degrade to array of any)
/// - `object` with nested `properties` (recursive); without `properties`,
///   a string-to-any map
/// - anything else becomes [`ArgSchema::Any`]
pub fn convert(schema: &JsonObject) -> ArgSchema {
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => ArgSchema::String,
        Some("number") => ArgSchema::Number,
        Some("integer") => ArgSchema::Integer,
        Some("boolean") => ArgSchema::Boolean,
        Some("array") => {
            let item = schema
                .get("items")
                .and_then(Value::as_object)
                .map(convert)
                .unwrap_or(ArgSchema::Any);
            // Only scalar item types stay typed; nested containers are
            // left for the upstream to check.
            let item = match item {
                ArgSchema::String
                | ArgSchema::Number
                | ArgSchema::Integer
                | ArgSchema::Boolean => item,
                _ => ArgSchema::Any,
            };
            ArgSchema::List(Box::new(item))
        }
        Some("object") => match schema.get("properties").and_then(Value::as_object) {
            Some(properties) => ArgSchema::Object(
                properties
                    .iter()
                    .map(|(key, prop)| {
                        let converted = prop
                            .as_object()
                            .map(convert)
                            .unwrap_or(ArgSchema::Any);
                        (key.clone(), converted)
                    })
                    .collect(),
            ),
            None => ArgSchema::Map,
        },
        _ => ArgSchema::Any,
    }
}

impl ArgSchema {
    /// Check a value against the validator.
    ///
    /// Permissive by design: only declared types are enforced, and object
    /// properties that are absent from the value are accepted.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            ArgSchema::Any => Ok(()),
            ArgSchema::String => expect(value.is_string(), "string", value),
            ArgSchema::Number => expect(value.is_number(), "number", value),
            ArgSchema::Integer => expect(value.is_i64() || value.is_u64(), "integer", value),
            ArgSchema::Boolean => expect(value.is_boolean(), "boolean", value),
            ArgSchema::List(item) => {
                let entries = value
                    .as_array()
                    .ok_or_else(|| type_error("array", value))?;
                for (index, entry) in entries.iter().enumerate() {
                    item.validate(entry)
                        .map_err(|reason| format!("[{}]: {}", index, reason))?;
                }
                Ok(())
            }
            ArgSchema::Object(properties) => {
                let map = value
                    .as_object()
                    .ok_or_else(|| type_error("object", value))?;
                for (key, property) in properties {
                    if let Some(entry) = map.get(key) {
                        property
                            .validate(entry)
                            .map_err(|reason| format!("{}: {}", key, reason))?;
                    }
                }
                Ok(())
            }
            ArgSchema::Map => expect(value.is_object(), "object", value),
        }
    }
}

fn expect(ok: bool, expected: &str, value: &Value) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(type_error(expected, value))
    }
}

fn type_error(expected: &str, value: &Value) -> String {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected {}, got {}", expected, actual)
}
