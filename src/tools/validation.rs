//! Check tool arguments against a tool's JSON Schema before local dispatch.
//!
//! This is a shallow check: top-level object shape, required keys, property
//! types (including `["string", "null"]` unions) and string `enum` members.
//! Nested schemas are left to the handler.

use serde_json::Value;

use crate::error::EngineError;

pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), EngineError> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(invalid(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        )));
    }
    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for name in required {
        if !obj.contains_key(name) {
            return Err(invalid(format!("missing required field '{name}'")));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if let Some(expected) = prop.get("type") {
            if !type_accepts(expected, value) {
                return Err(invalid(format!(
                    "field '{key}' expected type {expected}, got {}",
                    json_type_name(value)
                )));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !value.is_null() && !allowed.contains(value) {
                return Err(invalid(format!(
                    "field '{key}' is not one of {}",
                    Value::Array(allowed.clone())
                )));
            }
        }
    }
    Ok(())
}

fn invalid(detail: String) -> EngineError {
    EngineError::InvalidArgument(format!("bad tool arguments: {detail}"))
}

fn type_accepts(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => value_matches_type(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| value_matches_type(value, name)),
        _ => true,
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
