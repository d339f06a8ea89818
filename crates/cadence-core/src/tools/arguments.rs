//! Typed access to the string parameters of an invocation.

use std::collections::BTreeMap;

use crate::error::CadenceError;

/// Wrapper around invocation parameters providing typed extraction.
///
/// Both text grammars carry parameters as strings; these accessors parse on
/// demand and report missing or malformed values as
/// [`CadenceError::InvalidArgument`].
#[derive(Debug, Clone, Default)]
pub struct ToolArguments {
    values: BTreeMap<String, String>,
}

impl ToolArguments {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Get the raw parameter map.
    pub fn raw(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, CadenceError> {
        self.get_str_opt(key)
            .ok_or_else(|| CadenceError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, CadenceError> {
        let raw = self.get_str(key)?;
        raw.trim()
            .parse()
            .map_err(|_| CadenceError::InvalidArgument(format!("Argument {key} is not an integer: {raw}")))
    }

    /// Get a boolean argument (`true`/`false`/`yes`/`no`/`1`/`0`).
    pub fn get_bool(&self, key: &str) -> Result<bool, CadenceError> {
        let raw = self.get_str(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(CadenceError::InvalidArgument(format!(
                "Argument {key} is not a boolean: {raw}"
            ))),
        }
    }

    /// Get an optional boolean, falling back to `default` when absent.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, CadenceError> {
        if self.values.contains_key(key) {
            self.get_bool(key)
        } else {
            Ok(default)
        }
    }

    /// Parse a parameter holding JSON (e.g. MCP tool arguments).
    pub fn get_json(&self, key: &str) -> Result<serde_json::Value, CadenceError> {
        let raw = self.get_str(key)?;
        serde_json::from_str(raw.trim())
            .map_err(|e| CadenceError::InvalidArgument(format!("Argument {key} is not valid JSON: {e}")))
    }

    /// Deserialize the arguments into a typed struct; every field arrives as a string.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, CadenceError> {
        let value = serde_json::to_value(&self.values)?;
        serde_json::from_value(value).map_err(|e| {
            CadenceError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

impl From<BTreeMap<String, String>> for ToolArguments {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self::new(values)
    }
}
