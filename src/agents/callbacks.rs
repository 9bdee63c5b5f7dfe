//! Final answer checks
//!
//! Checks run after the model submits a final answer and before the run
//! accepts it. A failing check does not end the run: its message is recorded
//! in memory and the agent gets another step to fix the problem.

use async_trait::async_trait;
use std::sync::Arc;

use super::answer::FinalAnswer;
use super::memory::AgentMemory;
use crate::ai::ProviderError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckError {
    /// The expected output file was never written
    #[error("{0}")]
    ArtifactMissing(String),
    #[error("Could not read artifact {path}: {reason}")]
    ArtifactUnreadable { path: String, reason: String },
    /// The reviewer looked at the result and rejected it
    #[error("Reviewer rejected the answer:\n{critique}")]
    Rejected { critique: String },
    #[error("Reviewer unavailable: {0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Failed(String),
}

/// Gate on a submitted final answer
#[async_trait]
pub trait FinalAnswerCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, answer: &FinalAnswer, memory: &AgentMemory) -> Result<(), CheckError>;
}

/// Run checks in order, stopping at the first failure
pub async fn run_checks(
    checks: &[Arc<dyn FinalAnswerCheck>],
    answer: &FinalAnswer,
    memory: &AgentMemory,
) -> Result<(), (String, CheckError)> {
    for check in checks {
        if let Err(e) = check.check(answer, memory).await {
            tracing::info!("Check {} failed: {}", check.name(), e);
            return Err((check.name().to_string(), e));
        }
        tracing::debug!("Check {} passed", check.name());
    }
    Ok(())
}
