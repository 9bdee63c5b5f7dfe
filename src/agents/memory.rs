//! Agent memory - append-only record of one run
//! Every task, plan, action and final answer is kept in order so the model can
//! be re-prompted from it and the acceptance check can review the reasoning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::answer::FinalAnswer;
use crate::ai::{ChatMessage, TokenUsage, ToolCall};

/// One tool call and what came back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call: ToolCall,
    #[serde(default)]
    pub observation: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn success(call: ToolCall, observation: impl Into<String>) -> Self {
        Self {
            call,
            observation: Some(observation.into()),
            error: None,
        }
    }

    pub fn failure(call: ToolCall, error: impl Into<String>) -> Self {
        Self {
            call,
            observation: None,
            error: Some(error.into()),
        }
    }

    /// Text returned to the model for this call
    fn reply_text(&self) -> String {
        match (&self.observation, &self.error) {
            (_, Some(error)) => format!("Error: {}", error),
            (Some(observation), None) => observation.clone(),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub step_number: usize,
    /// Free text the model produced alongside (or instead of) tool calls
    pub model_output: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Step-level failure not tied to a single tool call
    pub error: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ActionStep {
    pub fn new(step_number: usize) -> Self {
        Self {
            step_number,
            model_output: None,
            tool_calls: Vec::new(),
            error: None,
            token_usage: None,
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Step error, or else the last tool error in the step
    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref().or_else(|| {
            self.tool_calls
                .iter()
                .rev()
                .find_map(|record| record.error.as_deref())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryStep {
    Task {
        task: String,
        timestamp: DateTime<Utc>,
    },
    Planning {
        plan: String,
        timestamp: DateTime<Utc>,
    },
    Action(ActionStep),
    FinalAnswer {
        answer: FinalAnswer,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub system_prompt: String,
    steps: Vec<MemoryStep>,
    pub token_usage: TokenUsage,
}

impl AgentMemory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, step: MemoryStep) {
        if let MemoryStep::Action(ref action) = step {
            if let Some(usage) = action.token_usage {
                self.token_usage.add(&usage);
            }
        }
        self.steps.push(step);
    }

    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.token_usage.add(usage);
    }

    pub fn steps(&self) -> &[MemoryStep] {
        &self.steps
    }

    pub fn action_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, MemoryStep::Action(_)))
            .count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.steps.iter().rev().find_map(|step| match step {
            MemoryStep::Action(action) => action.last_error().map(str::to_string),
            _ => None,
        })
    }

    /// Compact JSON view of the run without the system prompt, for reviewers
    pub fn succinct_steps(&self) -> String {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .map(|step| match step {
                MemoryStep::Task { task, .. } => json!({"task": task}),
                MemoryStep::Planning { plan, .. } => json!({"plan": plan}),
                MemoryStep::Action(action) => json!({
                    "step": action.step_number,
                    "model_output": action.model_output,
                    "tool_calls": action.tool_calls.iter().map(|r| json!({
                        "name": r.call.name,
                        "arguments": r.call.arguments,
                        "observation": r.observation,
                        "error": r.error,
                    })).collect::<Vec<_>>(),
                    "error": action.error,
                }),
                MemoryStep::FinalAnswer { answer, .. } => json!({"final_answer": answer.to_text()}),
            })
            .collect();
        serde_json::to_string_pretty(&steps).unwrap_or_default()
    }

    /// Rebuild the chat transcript the model sees on its next turn
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt.clone())];

        for step in &self.steps {
            match step {
                MemoryStep::Task { task, .. } => {
                    messages.push(ChatMessage::user(format!("New task:\n{}", task)));
                }
                MemoryStep::Planning { plan, .. } => {
                    messages.push(ChatMessage::assistant(Some(plan.clone()), Vec::new()));
                    messages.push(ChatMessage::user(
                        "Now proceed and carry out this plan.",
                    ));
                }
                MemoryStep::Action(action) => {
                    let calls: Vec<ToolCall> =
                        action.tool_calls.iter().map(|r| r.call.clone()).collect();
                    if action.model_output.is_some() || !calls.is_empty() {
                        messages.push(ChatMessage::assistant(action.model_output.clone(), calls));
                    }
                    for record in &action.tool_calls {
                        messages.push(ChatMessage::tool_result(
                            record.call.id.clone(),
                            record.reply_text(),
                        ));
                    }
                    if let Some(ref error) = action.error {
                        messages.push(ChatMessage::user(format!(
                            "Error:\n{}\nNow let's retry: take care not to repeat previous errors! \
                             If you have retried several times, try a completely different approach.",
                            error
                        )));
                    }
                }
                MemoryStep::FinalAnswer { .. } => {}
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Role;

    fn task(text: &str) -> MemoryStep {
        MemoryStep::Task {
            task: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_every_tool_call_gets_a_reply() {
        let mut memory = AgentMemory::new("system");
        memory.push(task("find cities"));

        let mut step = ActionStep::new(1);
        let ok = ToolCall::new("web_search", json!({"query": "largest cities"}));
        let bad = ToolCall::new("visit_webpage", json!({"url": "x"}));
        step.tool_calls.push(ToolCallRecord::success(ok.clone(), "[results]"));
        step.tool_calls.push(ToolCallRecord::failure(bad.clone(), "boom"));
        memory.push(MemoryStep::Action(step));

        let messages = memory.to_messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text(), "New task:\nfind cities");
        assert_eq!(messages[2].tool_calls.len(), 2);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some(ok.id.as_str()));
        assert_eq!(messages[4].text(), "Error: boom");
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn test_step_error_adds_retry_nudge() {
        let mut memory = AgentMemory::new("system");
        let mut step = ActionStep::new(1);
        step.model_output = Some("I think Tokyo".to_string());
        step.error = Some("No tool call in model output".to_string());
        memory.push(MemoryStep::Action(step));

        let messages = memory.to_messages();
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::User);
        assert!(messages[2].text().contains("No tool call in model output"));
        assert_eq!(memory.last_error().as_deref(), Some("No tool call in model output"));
    }

    #[test]
    fn test_usage_accumulates_and_steps_stay_ordered() {
        let mut memory = AgentMemory::new("system");
        memory.push(task("t"));
        for n in 1..=3 {
            let mut step = ActionStep::new(n);
            step.token_usage = Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 1,
            });
            memory.push(MemoryStep::Action(step));
        }
        assert_eq!(memory.token_usage.total(), 33);
        assert_eq!(memory.action_count(), 3);
        assert!(matches!(memory.steps()[0], MemoryStep::Task { .. }));
    }

    #[test]
    fn test_succinct_steps_omit_system_prompt() {
        let mut memory = AgentMemory::new("SECRET SYSTEM PROMPT");
        memory.push(task("map the cities"));
        let succinct = memory.succinct_steps();
        assert!(succinct.contains("map the cities"));
        assert!(!succinct.contains("SECRET SYSTEM PROMPT"));
    }
}
