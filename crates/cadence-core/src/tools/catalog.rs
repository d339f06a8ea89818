//! Registry of known tool names and their parameters.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One parameter accepted by a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Declaration of a tool the parser should recognize and the engine may run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Builder: add a required parameter.
    pub fn required(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.param(name, description, true)
    }

    /// Builder: add an optional parameter.
    pub fn optional(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.param(name, description, false)
    }

    fn param(mut self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            description: description.into(),
            required,
        });
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name == name)
    }

    /// JSON Schema view (all parameters are strings in the text grammars).
    pub fn json_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .params
            .iter()
            .map(|param| {
                (
                    param.name.clone(),
                    serde_json::json!({
                        "type": "string",
                        "description": param.description,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required_params().collect::<Vec<_>>(),
        })
    }
}

/// Set of tool specs keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, spec: ToolSpec) -> Self {
        self.register(spec);
        self
    }

    /// Register (or replace) a tool spec.
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    /// Union of every parameter name across all tools.
    pub fn param_names(&self) -> BTreeSet<&str> {
        self.tools
            .values()
            .flat_map(|spec| spec.params.iter().map(|param| param.name.as_str()))
            .collect()
    }
}

impl FromIterator<ToolSpec> for ToolCatalog {
    fn from_iter<I: IntoIterator<Item = ToolSpec>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for spec in iter {
            catalog.register(spec);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ToolCatalog {
        ToolCatalog::new()
            .with_tool(
                ToolSpec::new("read_file", "Read a file")
                    .required("path", "File path"),
            )
            .with_tool(
                ToolSpec::new("search_files", "Regex search")
                    .required("path", "Directory")
                    .required("regex", "Pattern")
                    .optional("file_pattern", "Glob filter"),
            )
    }

    #[test]
    fn catalog_lists_tools_and_params() {
        let catalog = sample();

        assert!(catalog.contains("read_file"));
        assert!(!catalog.contains("write_to_file"));
        assert_eq!(catalog.len(), 2);
        let params: Vec<_> = catalog.param_names().into_iter().collect();
        assert_eq!(params, vec!["file_pattern", "path", "regex"]);
    }

    #[test]
    fn required_params_exclude_optional_ones() {
        let catalog = sample();
        let spec = catalog.get("search_files").unwrap();
        let required: Vec<_> = spec.required_params().collect();
        assert_eq!(required, vec!["path", "regex"]);
        assert!(spec.has_param("file_pattern"));
    }

    #[test]
    fn json_schema_marks_required_fields() {
        let catalog = sample();
        let schema = catalog.get("search_files").unwrap().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["regex"]["type"], "string");
        assert_eq!(schema["required"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn registering_twice_replaces_the_spec() {
        let mut catalog = sample();
        catalog.register(ToolSpec::new("read_file", "Read a file v2"));
        assert_eq!(catalog.get("read_file").unwrap().description, "Read a file v2");
        assert!(catalog.get("read_file").unwrap().params.is_empty());
    }
}
