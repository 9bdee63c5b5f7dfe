//! Agent trait definitions and shared types
//! Core abstractions for single agents and manager/worker teams

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::answer::FinalAnswer;
use super::memory::AgentMemory;
use crate::ai::{ProviderError, TokenUsage};

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Agent error types
#[derive(Debug, Clone)]
pub enum AgentError {
    /// Model backend failed in a way the run cannot recover from
    Provider(ProviderError),
    /// Ran out of steps before an accepted final answer
    StepBudgetExhausted {
        max_steps: usize,
        last_error: Option<String>,
    },
    /// Invalid state or configuration
    ConfigError(String),
    /// Agent was cancelled
    Cancelled,
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Provider(e) => write!(f, "Model error: {}", e),
            AgentError::StepBudgetExhausted {
                max_steps,
                last_error,
            } => {
                write!(f, "Reached max steps ({}) without an accepted answer", max_steps)?;
                if let Some(err) = last_error {
                    write!(f, "; last error: {}", err)?;
                }
                Ok(())
            }
            AgentError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            AgentError::Cancelled => write!(f, "Agent was cancelled"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ProviderError> for AgentError {
    fn from(e: ProviderError) -> Self {
        AgentError::Provider(e)
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: FinalAnswer,
    pub steps_taken: usize,
    pub token_usage: TokenUsage,
    pub memory: AgentMemory,
}

/// Core agent trait - anything that can take a task and return an answer
#[async_trait]
pub trait Agent: Send + Sync {
    /// Get agent name
    fn name(&self) -> &str;

    /// Get agent description, shown to managers that delegate to it
    fn description(&self) -> &str;

    /// Run a task to completion
    async fn run(&self, task: &str) -> AgentResult<RunOutcome>;

    /// Tools and managed agents, for display
    fn structure(&self) -> AgentStructure;
}

/// Tree of an agent, its tools and the agents it manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStructure {
    pub name: String,
    pub description: String,
    pub model: String,
    pub max_steps: usize,
    pub tools: Vec<String>,
    pub managed_agents: Vec<AgentStructure>,
}

impl AgentStructure {
    /// Render as an indented tree
    pub fn visualize(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&format!(
            "{}{} ({}, max_steps={})\n",
            indent, self.name, self.model, self.max_steps
        ));
        if !self.description.is_empty() {
            out.push_str(&format!("{}  \"{}\"\n", indent, self.description));
        }
        if !self.tools.is_empty() {
            out.push_str(&format!("{}  tools: {}\n", indent, self.tools.join(", ")));
        }
        for managed in &self.managed_agents {
            managed.render(out, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_error_message() {
        let err = AgentError::StepBudgetExhausted {
            max_steps: 15,
            last_error: Some("Check failed".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Reached max steps (15) without an accepted answer; last error: Check failed"
        );
    }

    #[test]
    fn test_structure_visualize_nests_managed_agents() {
        let web = AgentStructure {
            name: "web_agent".to_string(),
            description: "Runs web searches for you.".to_string(),
            model: "gpt-4o".to_string(),
            max_steps: 10,
            tools: vec!["web_search".to_string(), "visit_webpage".to_string()],
            managed_agents: vec![],
        };
        let manager = AgentStructure {
            name: "manager".to_string(),
            description: String::new(),
            model: "gpt-4o".to_string(),
            max_steps: 15,
            tools: vec!["python_interpreter".to_string()],
            managed_agents: vec![web],
        };
        let tree = manager.visualize();
        assert!(tree.starts_with("manager (gpt-4o, max_steps=15)\n"));
        assert!(tree.contains("\n  web_agent (gpt-4o, max_steps=10)\n"));
        assert!(tree.contains("    tools: web_search, visit_webpage\n"));
    }
}
