//! Tool Trait Definitions

use super::types::*;
use async_trait::async_trait;
use serde_json::Value;

/// An executable capability the model can call by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool descriptor for discovery
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with given arguments. Output is always text for the model.
    async fn execute(&self, arguments: Value) -> Result<String, ToolError>;

    /// Validate arguments before execution. Default checks every required
    /// schema property is present.
    fn validate_arguments(&self, arguments: &Value) -> Result<(), ToolError> {
        let descriptor = self.descriptor();
        for name in &descriptor.input_schema.required {
            if arguments.get(name).is_none() {
                return Err(ToolError::InvalidArguments(format!(
                    "{} requires argument '{}'",
                    descriptor.name, name
                )));
            }
        }
        Ok(())
    }
}

/// Pull a required string argument out of a call payload
pub fn required_str<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' must be a string", name)))
}
