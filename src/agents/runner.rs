//! Tool-calling agent runner
//!
//! Drives the step loop: optional planning, one model turn per step, tool
//! execution, and final answer checks. The loop ends on an accepted final
//! answer, on cancellation, or when the step budget runs out.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::answer::FinalAnswer;
use super::callbacks::{run_checks, FinalAnswerCheck};
use super::delegation::ManagedAgentTool;
use super::memory::{ActionStep, AgentMemory, MemoryStep, ToolCallRecord};
use super::planner::Planner;
use super::traits::{Agent, AgentError, AgentResult, AgentStructure, RunOutcome};
use crate::ai::{CompletionOptions, Provider, ToolCall};
use crate::tools::{JsonSchema, PropertySchema, Tool, ToolBox, ToolDescriptor, ToolError};

pub const FINAL_ANSWER_TOOL: &str = "final_answer";

const NO_TOOL_CALL_ERROR: &str =
    "Model did not call any tool. Every step must call a tool; call final_answer to finish.";

/// Advertises `final_answer` to the model. Calls are intercepted by the runner.
struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: FINAL_ANSWER_TOOL.to_string(),
            description: "Provides a final answer to the given problem.".to_string(),
            input_schema: JsonSchema::object().with_required(
                "answer",
                PropertySchema::string(
                    "The final answer to the problem. Give tables as a JSON list of records.",
                ),
            ),
            output_type: "any".to_string(),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        Ok(arguments
            .get("answer")
            .map(|v| v.to_string())
            .unwrap_or_default())
    }
}

pub struct ToolCallingAgent {
    name: String,
    description: String,
    provider: Arc<dyn Provider>,
    tools: ToolBox,
    managed_agents: Vec<Arc<dyn Agent>>,
    max_steps: usize,
    planning_interval: Option<usize>,
    verbosity: u8,
    checks: Vec<Arc<dyn FinalAnswerCheck>>,
    artifact_path: Option<PathBuf>,
    options: CompletionOptions,
    system_prompt: String,
    planner: Planner,
}

pub struct ToolCallingAgentBuilder {
    name: String,
    description: String,
    provider: Arc<dyn Provider>,
    tools: Vec<Arc<dyn Tool>>,
    managed_agents: Vec<Arc<dyn Agent>>,
    max_steps: usize,
    planning_interval: Option<usize>,
    verbosity: u8,
    checks: Vec<Arc<dyn FinalAnswerCheck>>,
    artifact_path: Option<PathBuf>,
    options: CompletionOptions,
}

impl ToolCallingAgentBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Let this agent delegate to another one through a tool named after it
    pub fn managed_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.managed_agents.push(agent);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Plan before step 1 and every `interval` steps after
    pub fn planning_interval(mut self, interval: usize) -> Self {
        self.planning_interval = Some(interval);
        self
    }

    /// 0 = warnings only, 1 = one line per step, 2 = full step detail
    pub fn verbosity(mut self, level: u8) -> Self {
        self.verbosity = level.min(2);
        self
    }

    pub fn final_answer_check(mut self, check: Arc<dyn FinalAnswerCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// File the run is expected to produce; an existing file makes the final
    /// answer an artifact
    pub fn artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> AgentResult<ToolCallingAgent> {
        if self.max_steps == 0 {
            return Err(AgentError::ConfigError("max_steps must be at least 1".to_string()));
        }
        if !is_identifier(&self.name) {
            return Err(AgentError::ConfigError(format!(
                "agent name '{}' must be a valid identifier",
                self.name
            )));
        }

        let mut tools = ToolBox::new();
        let managed_tools = self
            .managed_agents
            .iter()
            .map(|agent| Arc::new(ManagedAgentTool::new(agent.clone())) as Arc<dyn Tool>);
        for tool in self
            .tools
            .into_iter()
            .chain(managed_tools)
            .chain(std::iter::once(Arc::new(FinalAnswerTool) as Arc<dyn Tool>))
        {
            tools
                .add(tool)
                .map_err(|e| AgentError::ConfigError(e.to_string()))?;
        }

        let system_prompt = system_prompt(&tools, &self.managed_agents);
        let planner = Planner::new(self.provider.clone(), self.options.clone());

        Ok(ToolCallingAgent {
            name: self.name,
            description: self.description,
            provider: self.provider,
            tools,
            managed_agents: self.managed_agents,
            max_steps: self.max_steps,
            planning_interval: self.planning_interval,
            verbosity: self.verbosity,
            checks: self.checks,
            artifact_path: self.artifact_path,
            options: self.options,
            system_prompt,
            planner,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn tool_list(tools: &ToolBox, managed: &[Arc<dyn Agent>]) -> String {
    tools
        .descriptors()
        .iter()
        .filter(|d| !managed.iter().any(|a| a.name() == d.name))
        .map(|d| format!("- {}: {}", d.name, d.description))
        .chain(
            managed
                .iter()
                .map(|a| format!("- {} (team member): {}", a.name(), a.description())),
        )
        .collect::<Vec<_>>()
        .join("\n")
}

fn system_prompt(tools: &ToolBox, managed: &[Arc<dyn Agent>]) -> String {
    let mut prompt = String::from(
        "You are an expert assistant who can solve any task using tool calls. \
         You will be given a task to solve as best you can.\n\
         Work in steps. In each step, call one or more tools and wait for their results before continuing.\n\
         When you have the answer, call the `final_answer` tool with it.\n\n\
         You have access to these tools:\n",
    );
    prompt.push_str(&tool_list(tools, managed));

    if !managed.is_empty() {
        prompt.push_str(
            "\n\nSome of those are team members. Call them like any tool, with a single `task` argument. \
             They are real people-like agents: give them as much detail as possible in the task.",
        );
    }

    prompt.push_str(
        "\n\nRules:\n\
         1. ALWAYS answer with a tool call, never with plain text.\n\
         2. Always use the right arguments for the tools; use values, not variable names.\n\
         3. Do not repeat a tool call with exactly the same arguments.\n\
         4. Do not invent facts or numbers; only use what your tools returned.",
    );
    prompt
}

impl ToolCallingAgent {
    pub fn builder(provider: Arc<dyn Provider>) -> ToolCallingAgentBuilder {
        ToolCallingAgentBuilder {
            name: "agent".to_string(),
            description: String::new(),
            provider,
            tools: Vec::new(),
            managed_agents: Vec::new(),
            max_steps: 20,
            planning_interval: None,
            verbosity: 1,
            checks: Vec::new(),
            artifact_path: None,
            options: CompletionOptions::default(),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Run with external cancellation. Cancellation is observed at every
    /// model turn, tool call and check.
    pub async fn run_with_cancellation(
        &self,
        task: &str,
        cancel: CancellationToken,
    ) -> AgentResult<RunOutcome> {
        let mut memory = AgentMemory::new(self.system_prompt.clone());
        memory.push(MemoryStep::Task {
            task: task.to_string(),
            timestamp: chrono::Utc::now(),
        });

        if self.verbosity >= 1 {
            tracing::info!("[{}] New run: {}", self.name, preview(task, 200));
        }

        let descriptors = self.tools.descriptors();
        let tools_text = tool_list(&self.tools, &self.managed_agents);

        for step in 1..=self.max_steps {
            if cancel.is_cancelled() {
                tracing::info!("[{}] Cancelled before step {}", self.name, step);
                return Err(AgentError::Cancelled);
            }

            if Planner::is_due(step, self.planning_interval) {
                let planning = async {
                    if step == 1 {
                        self.planner.initial_plan(task, &tools_text).await
                    } else {
                        self.planner
                            .update_plan(task, &tools_text, &memory, step, self.max_steps)
                            .await
                    }
                };
                let (plan, usage) = tokio::select! {
                    result = planning => result?,
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                };
                if let Some(usage) = usage {
                    memory.add_usage(&usage);
                }
                if self.verbosity >= 1 {
                    tracing::info!("[{}] Plan:\n{}", self.name, plan);
                }
                memory.push(MemoryStep::Planning {
                    plan,
                    timestamp: chrono::Utc::now(),
                });
            }

            let started = Instant::now();
            let mut action = ActionStep::new(step);
            let messages = memory.to_messages();

            let response = tokio::select! {
                result = self.provider.chat(&messages, &descriptors, &self.options) => result?,
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            };
            action.token_usage = response.usage;
            action.model_output = response.content.filter(|t| !t.trim().is_empty());

            if response.tool_calls.is_empty() {
                action.error = Some(NO_TOOL_CALL_ERROR.to_string());
            }

            for call in response.tool_calls {
                if call.name == FINAL_ANSWER_TOOL {
                    let answer = FinalAnswer::classify(
                        final_answer_value(&call),
                        self.artifact_path.as_deref(),
                    );

                    // Checks see the run including this step
                    let mut review = memory.clone();
                    review.push(MemoryStep::Action(action.clone()));

                    let verdict = tokio::select! {
                        result = run_checks(&self.checks, &answer, &review) => result,
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    };

                    match verdict {
                        Ok(()) => {
                            action
                                .tool_calls
                                .push(ToolCallRecord::success(call, "Final answer accepted."));
                            action.duration_ms = started.elapsed().as_millis() as u64;
                            memory.push(MemoryStep::Action(action));
                            memory.push(MemoryStep::FinalAnswer {
                                answer: answer.clone(),
                                timestamp: chrono::Utc::now(),
                            });

                            if self.verbosity >= 1 {
                                tracing::info!(
                                    "[{}] Final answer after {} steps: {}",
                                    self.name,
                                    step,
                                    preview(&answer.to_text(), 500)
                                );
                            }

                            return Ok(RunOutcome {
                                answer,
                                steps_taken: step,
                                token_usage: memory.token_usage,
                                memory,
                            });
                        }
                        Err((check, e)) => {
                            let message = format!("Check {} failed with error: {}", check, e);
                            action.tool_calls.push(ToolCallRecord::failure(call, message));
                        }
                    }
                    continue;
                }

                let result = tokio::select! {
                    result = self.tools.invoke(&call) => result,
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                };
                let record = match result {
                    Ok(observation) => ToolCallRecord::success(call, observation),
                    Err(e) => {
                        let message = format!("Error executing tool '{}': {}", call.name, e);
                        ToolCallRecord::failure(call, message)
                    }
                };
                action.tool_calls.push(record);
            }

            action.duration_ms = started.elapsed().as_millis() as u64;
            self.log_step(&action);
            memory.push(MemoryStep::Action(action));
        }

        let last_error = memory.last_error();
        tracing::warn!(
            "[{}] Reached max steps ({}) without an accepted answer",
            self.name,
            self.max_steps
        );
        Err(AgentError::StepBudgetExhausted {
            max_steps: self.max_steps,
            last_error,
        })
    }

    fn log_step(&self, action: &ActionStep) {
        match self.verbosity {
            0 => {
                if let Some(error) = action.last_error() {
                    tracing::debug!("[{}] Step {} error: {}", self.name, action.step_number, error);
                }
                return;
            }
            1 => {
                let calls: Vec<&str> = action
                    .tool_calls
                    .iter()
                    .map(|r| r.call.name.as_str())
                    .collect();
                tracing::info!(
                    "[{}] Step {}: [{}] ({}ms){}",
                    self.name,
                    action.step_number,
                    calls.join(", "),
                    action.duration_ms,
                    if action.last_error().is_some() { " with errors" } else { "" }
                );
                return;
            }
            _ => {}
        }

        tracing::info!(
            "[{}] Step {} ({}ms)",
            self.name,
            action.step_number,
            action.duration_ms
        );
        if let Some(ref output) = action.model_output {
            tracing::info!("  model: {}", preview(output, 300));
        }
        for record in &action.tool_calls {
            tracing::info!("  call {} {}", record.call.name, record.call.arguments);
            match (&record.observation, &record.error) {
                (_, Some(error)) => tracing::warn!("  error: {}", preview(error, 300)),
                (Some(observation), None) => tracing::info!("  -> {}", preview(observation, 300)),
                _ => {}
            }
        }
        if let Some(ref error) = action.error {
            tracing::warn!("  step error: {}", error);
        }
    }
}

/// The submitted answer: the `answer` argument, or the raw arguments when the
/// model did not follow the schema
fn final_answer_value(call: &ToolCall) -> Value {
    match call.arguments.get("answer") {
        Some(value) => value.clone(),
        None => call.arguments.clone(),
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

#[async_trait]
impl Agent for ToolCallingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, task: &str) -> AgentResult<RunOutcome> {
        self.run_with_cancellation(task, CancellationToken::new())
            .await
    }

    fn structure(&self) -> AgentStructure {
        AgentStructure {
            name: self.name.clone(),
            description: self.description.clone(),
            model: self.provider.model().to_string(),
            max_steps: self.max_steps,
            tools: self
                .tools
                .names()
                .into_iter()
                .filter(|n| !self.managed_agents.iter().any(|a| a.name() == n))
                .collect(),
            managed_agents: self.managed_agents.iter().map(|a| a.structure()).collect(),
        }
    }
}
