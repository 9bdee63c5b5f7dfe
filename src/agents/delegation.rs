//! Delegation - calling a managed agent like a tool
//!
//! A manager sees each managed agent as a tool named after it that takes a
//! single `task` argument. The worker runs to completion with its own memory
//! and budget; only its final answer (or failure) comes back.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::traits::Agent;
use crate::ai::TokenUsage;
use crate::tools::{required_str, JsonSchema, PropertySchema, Tool, ToolDescriptor, ToolError};

pub struct ManagedAgentTool {
    agent: Arc<dyn Agent>,
    usage: Mutex<TokenUsage>,
}

impl ManagedAgentTool {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Tokens spent by every delegated run so far
    pub fn usage(&self) -> TokenUsage {
        match self.usage.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn framed_task(&self, task: &str) -> String {
        format!(
            "You're a helpful agent named '{}'.\n\
             You have been submitted this task by your manager.\n\
             ---\n\
             Task:\n{}\n\
             ---\n\
             You're helping your manager solve a wider task: so make sure to not provide a one-line answer, \
             but give as much information as possible to give them a clear understanding of the answer.\n\
             Put all of this in your final_answer tool; everything you do not pass as an argument to final_answer will be lost.\n\
             And even if your task resolution is not successful, please return as much context as possible, \
             so that your manager can act upon this feedback.",
            self.agent.name(),
            task
        )
    }
}

#[async_trait]
impl Tool for ManagedAgentTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.agent.name().to_string(),
            description: self.agent.description().to_string(),
            input_schema: JsonSchema::object().with_required(
                "task",
                PropertySchema::string(
                    "Long detailed description of the task for this team member.",
                ),
            ),
            output_type: "string".to_string(),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let task = required_str(&arguments, "task")?;
        let name = self.agent.name().to_string();

        tracing::info!("Delegating to {}: {}", name, task);

        let outcome = self
            .agent
            .run(&self.framed_task(task))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{} failed: {}", name, e)))?;

        {
            let mut usage = match self.usage.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            usage.add(&outcome.token_usage);
        }
        tracing::info!(
            "{} finished in {} steps ({} tokens)",
            name,
            outcome.steps_taken,
            outcome.token_usage.total()
        );

        Ok(format!(
            "Here is the final answer from your managed agent '{}':\n{}",
            name,
            outcome.answer.to_text()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::runner::{ToolCallingAgent, FINAL_ANSWER_TOOL};
    use crate::ai::{ChatResponse, ScriptedProvider, ToolCall};
    use serde_json::json;

    #[tokio::test]
    async fn test_wraps_worker_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse {
            content: None,
            tool_calls: vec![ToolCall::new(
                FINAL_ANSWER_TOOL,
                json!({"answer": "Tokyo: 37.19M"}),
            )],
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            }),
        }]));
        let worker = ToolCallingAgent::builder(provider.clone())
            .name("web_agent")
            .description("Runs web searches for you.")
            .build()
            .unwrap();

        let tool = ManagedAgentTool::new(Arc::new(worker));
        assert_eq!(tool.descriptor().name, "web_agent");

        let reply = tool
            .execute(json!({"task": "find the biggest city"}))
            .await
            .unwrap();
        assert_eq!(
            reply,
            "Here is the final answer from your managed agent 'web_agent':\nTokyo: 37.19M"
        );
        assert_eq!(tool.usage().total(), 120);

        let framed = provider.requests()[0][1].text();
        assert!(framed.contains("find the biggest city"));
        assert!(framed.contains("named 'web_agent'"));
    }

    #[tokio::test]
    async fn test_worker_failure_becomes_tool_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse::text("no tools")]));
        let worker = ToolCallingAgent::builder(provider)
            .name("web_agent")
            .max_steps(1)
            .build()
            .unwrap();

        let tool = ManagedAgentTool::new(Arc::new(worker));
        let err = tool.execute(json!({"task": "x"})).await.unwrap_err();
        assert!(err.to_string().contains("web_agent failed: Reached max steps (1)"));
    }
}
