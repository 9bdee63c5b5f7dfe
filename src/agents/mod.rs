//! Agent system for City Scout
//! A tool-calling step loop, manager/worker delegation, and final answer checks

pub mod answer;
pub mod callbacks;
pub mod delegation;
pub mod memory;
pub mod planner;
pub mod runner;
pub mod traits;
pub mod verifier;

pub use answer::FinalAnswer;
pub use callbacks::{CheckError, FinalAnswerCheck};
pub use delegation::ManagedAgentTool;
pub use memory::{AgentMemory, MemoryStep};
pub use runner::{ToolCallingAgent, ToolCallingAgentBuilder, FINAL_ANSWER_TOOL};
pub use traits::{Agent, AgentError, AgentResult, AgentStructure, RunOutcome};
pub use verifier::{CheckState, PlotVerifier, Verdict, VerdictMode};
