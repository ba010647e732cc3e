//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::{EngineError, Result};

/// Arguments of one tool invocation, with typed getters for handlers.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    /// Wrap raw arguments. Backends that send a JSON-encoded string are
    /// unwrapped here so handlers always see the parsed value.
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::String(raw) => match raw.trim() {
                "" => Value::Object(Default::default()),
                trimmed => serde_json::from_str(trimmed).unwrap_or(Value::String(raw)),
            },
            other => other,
        };
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("integer", key))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| missing("boolean", key))
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<Value>> {
        self.value
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| missing("array", key))
    }

    /// Deserialize the whole argument object into `T`.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            EngineError::InvalidArgument(format!("failed to deserialize arguments: {e}"))
        })
    }
}

fn missing(kind: &str, key: &str) -> EngineError {
    EngineError::InvalidArgument(format!("missing {kind} argument: {key}"))
}
