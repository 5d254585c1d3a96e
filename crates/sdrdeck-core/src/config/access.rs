//! Typed field access over the loosely-typed document tree.
//!
//! The configuration is a JSON tree; callers that expect a particular shape
//! go through these accessors so a type mismatch surfaces as a
//! [`ConfigError`] instead of a silent coercion.

use serde_json::{Map, Value};

use super::store::ConfigError;

/// Name of a JSON value's type, for error messages.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Typed accessors for object fields.
pub trait FieldAccess {
    /// Look up `key`, failing when absent.
    fn field(&self, key: &str) -> Result<&Value, ConfigError>;

    /// `key` as a bool.
    fn bool_field(&self, key: &str) -> Result<bool, ConfigError>;

    /// `key` as an f64.
    fn f64_field(&self, key: &str) -> Result<f64, ConfigError>;

    /// `key` as a u32.
    fn u32_field(&self, key: &str) -> Result<u32, ConfigError>;

    /// `key` as a string slice.
    fn str_field(&self, key: &str) -> Result<&str, ConfigError>;

    /// `key` as an object map.
    fn object_field(&self, key: &str) -> Result<&Map<String, Value>, ConfigError>;

    /// `key` as an array.
    fn array_field(&self, key: &str) -> Result<&[Value], ConfigError>;
}

fn mismatch(key: &str, expected: &'static str, value: &Value) -> ConfigError {
    ConfigError::TypeMismatch {
        field: key.to_string(),
        expected,
        found: json_type_name(value),
    }
}

impl FieldAccess for Value {
    fn field(&self, key: &str) -> Result<&Value, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingField(key.to_string()))
    }

    fn bool_field(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self.field(key)?;
        value.as_bool().ok_or_else(|| mismatch(key, "bool", value))
    }

    fn f64_field(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.field(key)?;
        value.as_f64().ok_or_else(|| mismatch(key, "number", value))
    }

    fn u32_field(&self, key: &str) -> Result<u32, ConfigError> {
        let value = self.field(key)?;
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| mismatch(key, "u32", value))
    }

    fn str_field(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self.field(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "string", value))
    }

    fn object_field(&self, key: &str) -> Result<&Map<String, Value>, ConfigError> {
        let value = self.field(key)?;
        value
            .as_object()
            .ok_or_else(|| mismatch(key, "object", value))
    }

    fn array_field(&self, key: &str) -> Result<&[Value], ConfigError> {
        let value = self.field(key)?;
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| mismatch(key, "array", value))
    }
}
