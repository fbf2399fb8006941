//! Entity payloads and the definition-driven validator.

use crate::definition::EntityDefinition;
use crate::error::{ModelError, ModelResult};
use crate::field::{FieldDescriptor, FieldType};
use serde_json::Value;

/// An entity payload: the full JSON object stored in the overflow column.
pub type Record = serde_json::Map<String, Value>;

/// Validates `record` against `definition` and returns the normalized record.
///
/// Normalization applies declared defaults and fills absent complex fields
/// with empty containers. Keys not declared by the definition pass through
/// untouched.
pub fn validate_record(definition: &EntityDefinition, mut record: Record) -> ModelResult<Record> {
    let entity = definition.name.as_str();
    for field in &definition.fields {
        let present = record.get(&field.name).is_some_and(|v| !v.is_null());
        if !present {
            if field.is_primary_key {
                return Err(ModelError::validation(
                    entity,
                    format!("primary key '{}' is required", field.name),
                ));
            }
            if let Some(default) = field.coerced_default() {
                check_value(entity, field, &default)?;
                record.insert(field.name.clone(), default);
            } else if field.field_type.is_complex() {
                if !record.contains_key(&field.name) {
                    if let Some(empty) = field.field_type.empty_value() {
                        record.insert(field.name.clone(), empty);
                    }
                }
            } else if field.required {
                return Err(ModelError::validation(
                    entity,
                    format!("field '{}' is required", field.name),
                ));
            }
            continue;
        }
        if let Some(value) = record.get(&field.name) {
            check_value(entity, field, value)?;
        }
    }
    Ok(record)
}

fn check_value(entity: &str, field: &FieldDescriptor, value: &Value) -> ModelResult<()> {
    let mismatch = || {
        ModelError::validation(
            entity,
            format!("field '{}' expects {}, got {}", field.name, field.field_type, json_kind(value)),
        )
    };
    match field.field_type {
        FieldType::String | FieldType::Text => {
            let s = value.as_str().ok_or_else(mismatch)?;
            if let Some(max) = field.effective_max_length() {
                let len = s.chars().count();
                if len > max {
                    return Err(ModelError::validation(
                        entity,
                        format!("field '{}' is {len} characters long (max {max})", field.name),
                    ));
                }
            }
        }
        FieldType::Integer => {
            if value.as_i64().is_none() {
                return Err(mismatch());
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                return Err(mismatch());
            }
        }
        FieldType::DateTime => {
            let s = value.as_str().ok_or_else(mismatch)?;
            if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                return Err(ModelError::validation(
                    entity,
                    format!("field '{}' is not an RFC 3339 datetime: {s}", field.name),
                ));
            }
        }
        FieldType::StringArray => {
            let items = value.as_array().ok_or_else(mismatch)?;
            if !items.iter().all(Value::is_string) {
                return Err(ModelError::validation(
                    entity,
                    format!("field '{}' must contain only strings", field.name),
                ));
            }
        }
        FieldType::Object => {
            if !value.is_object() {
                return Err(mismatch());
            }
        }
        FieldType::ObjectArray => {
            let items = value.as_array().ok_or_else(mismatch)?;
            if !items.iter().all(Value::is_object) {
                return Err(ModelError::validation(
                    entity,
                    format!("field '{}' must contain only objects", field.name),
                ));
            }
        }
    }
    Ok(())
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

/// Renders a key value the way it is stored in the primary-key column.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
