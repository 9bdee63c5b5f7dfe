//! Tools the agents can call
//!
//! Key concepts:
//! - **Tool**: an executable capability described by a JSON schema
//! - **ToolBox**: the ordered set of tools one agent exposes to its model
//! - **Sandbox**: allow-listed Python execution for the manager agent
//!
//! Research tools (`web_search`, `visit_webpage`) only read from the network;
//! the code tool is the only one with local side effects.

pub mod markdown;
pub mod sandbox;
pub mod traits;
pub mod types;
pub mod visit_webpage;
pub mod web_search;

pub use sandbox::{
    CodeExecutionTool, CodeExecutor, ExecutionOutput, ImportPolicy, PythonExecutor, SandboxError,
};
pub use traits::{required_str, Tool};
pub use types::*;
pub use visit_webpage::VisitWebpageTool;
pub use web_search::WebSearchTool;

use std::sync::Arc;
use std::time::Instant;

use crate::ai::ToolCall;

/// Ordered collection of tools with unique names
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Fails if a tool with the same name is already present.
    pub fn add(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.descriptor().name;
        if self.get(&name).is_some() {
            return Err(ToolError::InvalidArguments(format!(
                "duplicate tool name '{}'",
                name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.descriptor().name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate and run one model-requested call
    pub async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        tool.validate_arguments(&call.arguments)?;

        let start = Instant::now();
        let result = tool.execute(call.arguments.clone()).await;
        let elapsed = start.elapsed().as_millis();

        match &result {
            Ok(output) => tracing::debug!(
                "Tool {} finished in {}ms ({} chars)",
                call.name,
                elapsed,
                output.len()
            ),
            Err(e) => tracing::warn!("Tool {} failed after {}ms: {}", call.name, elapsed, e),
        }

        result
    }
}
