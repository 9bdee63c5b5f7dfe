//! Tool Core Types
//!
//! Descriptors advertised to the model and the error type shared by every tool.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object schema for tool arguments, as sent in the function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl JsonSchema {
    pub fn object() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_required(mut self, name: &str, property: PropertySchema) -> Self {
        self.properties.insert(name.to_string(), property);
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PropertySchema {
    pub fn string(description: &str) -> Self {
        Self {
            kind: "string".to_string(),
            description: Some(description.to_string()),
        }
    }
}

/// What the model is told about a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Function name the model calls, unique within a `ToolBox`
    pub name: String,
    pub description: String,
    pub input_schema: JsonSchema,
    /// "string" for tools returning text, "any" for `final_answer`
    pub output_type: String,
}

impl ToolDescriptor {
    /// Descriptor for a tool taking exactly one required string argument
    pub fn single_string(name: &str, description: &str, param: &str, param_description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: JsonSchema::object()
                .with_required(param, PropertySchema::string(param_description)),
            output_type: "string".to_string(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Service error: {0}")]
    Service(String),
}
