//! JSON Schema validation.

use crate::value::{Map, Value};
use std::path::Path;

/// Validates documents against JSON Schemas.
///
/// Validation never mutates the document and is deterministic.
pub trait SchemaValidator: Send + Sync {
    /// Whether the schema itself is well formed.
    fn validate_schema(&self, schema: &Value) -> bool;

    /// Whether the document satisfies the schema. Violations are logged.
    fn validate(&self, document: &Value, schema: &Value) -> bool;
}

/// Validator backed by the `jsonschema` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate_schema(&self, schema: &Value) -> bool {
        if !matches!(schema, Value::Object(_) | Value::Bool(_)) {
            return false;
        }
        let schema = serde_json::Value::from(schema.clone());
        match jsonschema::validator_for(&schema) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "invalid JSON schema");
                false
            }
        }
    }

    fn validate(&self, document: &Value, schema: &Value) -> bool {
        let schema = serde_json::Value::from(schema.clone());
        let validator = match jsonschema::validator_for(&schema) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "invalid JSON schema");
                return false;
            }
        };
        let instance = serde_json::Value::from(document.clone());
        let mut valid = true;
        for error in validator.iter_errors(&instance) {
            tracing::error!(path = %error.instance_path, "{}", error);
            valid = false;
        }
        valid
    }
}

/// Read a schema file and check it is a well-formed schema.
pub fn load_schema(path: &Path, validator: &dyn SchemaValidator) -> Result<Value, SchemaError> {
    let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| SchemaError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let schema = Value::from(json);
    if !validator.validate_schema(&schema) {
        return Err(SchemaError::Invalid(path.display().to_string()));
    }
    tracing::debug!(path = %path.display(), "loaded schema");
    Ok(schema)
}

/// Properties named by both schemas, in `old` order.
///
/// Array properties whose items carry `properties` on both sides are
/// flattened to the shared item properties, recursively.
pub fn shared_properties(old: &Value, new: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_shared(old, new, &mut names);
    names
}

fn collect_shared(old: &Value, new: &Value, names: &mut Vec<String>) {
    let (Some(old_props), Some(new_props)) = (properties(old), properties(new)) else {
        return;
    };
    for (name, old_prop) in old_props {
        let Some(new_prop) = new_props.get(name) else {
            continue;
        };
        let is_array = old_prop
            .as_object()
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            == Some("array");
        match (is_array, items(old_prop), items(new_prop)) {
            (true, Some(old_items), Some(new_items)) => collect_shared(old_items, new_items, names),
            _ => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
    }
}

fn properties(schema: &Value) -> Option<&Map> {
    schema.as_object()?.get("properties")?.as_object()
}

fn items(schema: &Value) -> Option<&Value> {
    let items = schema.as_object()?.get("items")?;
    properties(items).map(|_| items)
}

/// Errors loading schemas.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read schema {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema {path}: {message}")]
    Parse { path: String, message: String },

    #[error("not a valid JSON schema: {0}")]
    Invalid(String),
}
