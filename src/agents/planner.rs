//! Planner - periodic plan and plan revision
//! Runs text-only model turns at the start of a run and every `planning_interval`
//! steps afterwards, so long runs re-state known facts and remaining work.

use std::sync::Arc;

use super::memory::AgentMemory;
use super::traits::{AgentError, AgentResult};
use crate::ai::{ChatMessage, CompletionOptions, Provider, TokenUsage};

pub struct Planner {
    provider: Arc<dyn Provider>,
    options: CompletionOptions,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>, options: CompletionOptions) -> Self {
        Self { provider, options }
    }

    /// Whether a plan is due before `step` (1-based)
    pub fn is_due(step: usize, interval: Option<usize>) -> bool {
        match interval {
            Some(n) if n > 0 => step == 1 || (step - 1) % n == 0,
            _ => false,
        }
    }

    /// First plan, written before any action
    pub async fn initial_plan(
        &self,
        task: &str,
        tool_list: &str,
    ) -> AgentResult<(String, Option<TokenUsage>)> {
        let prompt = format!(
            r#"You are a world expert at analyzing a situation to derive facts, and plan accordingly towards solving a task.
Below I will present you a task. You will need to 1. build a survey of facts known or needed to solve the task, then 2. make a plan of action to solve the task.

## 1. Facts survey
List the facts given in the task, the facts to look up, and the facts to derive. Do not make any assumptions.

## 2. Plan
Develop a step-by-step high-level plan taking into account the facts above. Do not skip steps and do not add superfluous ones. Only write the high-level plan, DO NOT DETAIL INDIVIDUAL TOOL CALLS.
After writing the final step of the plan, write '<end_plan>' and stop there.

You can use these tools and team members:
{}

---
Now begin! Here is your task:
```
{}
```"#,
            tool_list, task
        );
        self.ask(vec![ChatMessage::user(prompt)]).await
    }

    /// Revised plan given everything done so far
    pub async fn update_plan(
        &self,
        task: &str,
        tool_list: &str,
        memory: &AgentMemory,
        step: usize,
        max_steps: usize,
    ) -> AgentResult<(String, Option<TokenUsage>)> {
        let mut messages = memory.to_messages();
        // Drop the runtime system prompt; the planner has its own framing
        messages.remove(0);
        messages.insert(
            0,
            ChatMessage::system(format!(
                "You are a world expert at analyzing a situation, and plan accordingly towards solving a task.\n\
                 You have been given the following task:\n```\n{}\n```\n\
                 Below you will find a history of attempts made to solve this task.",
                task
            )),
        );
        messages.push(ChatMessage::user(format!(
            r#"Now write your updated facts survey below, then your new plan.

## 1. Updated facts survey
List the facts given in the task, the facts learned so far, the facts still to look up, and the facts still to derive.

## 2. Plan
Write a step-by-step high-level plan to solve the task above. You can use these tools and team members:
{}

Beware that you have {} steps remaining. Only write the high-level plan, then write '<end_plan>' and stop there."#,
            tool_list,
            max_steps.saturating_sub(step) + 1
        )));
        self.ask(messages).await
    }

    async fn ask(&self, messages: Vec<ChatMessage>) -> AgentResult<(String, Option<TokenUsage>)> {
        let response = self
            .provider
            .chat(&messages, &[], &self.options)
            .await
            .map_err(AgentError::Provider)?;

        let plan = response
            .content
            .map(|text| match text.find("<end_plan>") {
                Some(idx) => text[..idx].trim().to_string(),
                None => text.trim().to_string(),
            })
            .unwrap_or_default();

        Ok((plan, response.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ChatResponse, ScriptedProvider};

    #[test]
    fn test_is_due() {
        assert!(Planner::is_due(1, Some(5)));
        assert!(!Planner::is_due(2, Some(5)));
        assert!(Planner::is_due(6, Some(5)));
        assert!(Planner::is_due(11, Some(5)));
        assert!(!Planner::is_due(1, None));
        assert!(!Planner::is_due(1, Some(0)));
    }

    #[tokio::test]
    async fn test_plan_stops_at_end_marker() {
        let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse::text(
            "1. Search\n2. Map\n<end_plan>\nignored",
        )]));
        let planner = Planner::new(provider, CompletionOptions::default());
        let (plan, _) = planner.initial_plan("map cities", "- web_agent").await.unwrap();
        assert_eq!(plan, "1. Search\n2. Map");
    }
}
