//! Plot Verifier - acceptance check for the map run
//! Loads the saved plot, shows it to a vision model together with the run's
//! steps, and turns the critique into a PASS/FAIL verdict.

use base64::Engine;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::answer::FinalAnswer;
use super::callbacks::{CheckError, FinalAnswerCheck};
use super::memory::AgentMemory;
use crate::ai::Provider;

lazy_static! {
    static ref DECISION_LINE: Regex = Regex::new(r"(?m)^\s*DECISION:\s*(PASS|FAIL)\b").unwrap();
}

/// Where a verification currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckState {
    Pending,
    LoadingArtifact,
    Critiquing,
    Accepted,
    Rejected,
}

/// How the critique text is turned into a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictMode {
    /// Any occurrence of "FAIL" rejects
    #[default]
    Substring,
    /// Only an explicit `DECISION: PASS` line accepts
    Strict,
}

impl VerdictMode {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "substring" => Some(VerdictMode::Substring),
            "strict" => Some(VerdictMode::Strict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn parse(critique: &str, mode: VerdictMode) -> Self {
        match mode {
            VerdictMode::Substring => {
                if critique.contains("FAIL") {
                    Verdict::Fail
                } else {
                    Verdict::Pass
                }
            }
            // Last decision line wins; no decision fails safe
            VerdictMode::Strict => match DECISION_LINE.captures_iter(critique).last() {
                Some(caps) if &caps[1] == "PASS" => Verdict::Pass,
                _ => Verdict::Fail,
            },
        }
    }
}

pub struct PlotVerifier {
    provider: Arc<dyn Provider>,
    artifact_path: PathBuf,
    mode: VerdictMode,
    state: RwLock<CheckState>,
}

impl PlotVerifier {
    pub fn new(provider: Arc<dyn Provider>, artifact_path: impl Into<PathBuf>, mode: VerdictMode) -> Self {
        Self {
            provider,
            artifact_path: artifact_path.into(),
            mode,
            state: RwLock::new(CheckState::Pending),
        }
    }

    pub fn state(&self) -> CheckState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn transition(&self, next: CheckState) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Verifier state lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        tracing::debug!("Plot check {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn artifact_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.artifact_path.display().to_string())
    }

    /// Decode the artifact and re-encode it as PNG, base64 encoded
    async fn load_png_base64(&self, path: &Path) -> Result<String, CheckError> {
        let unreadable = |reason: String| CheckError::ArtifactUnreadable {
            path: path.display().to_string(),
            reason,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        let image = image::load_from_memory(&bytes).map_err(|e| unreadable(e.to_string()))?;

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| unreadable(e.to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(png))
    }

    fn critique_prompt(&self, succinct_steps: &str) -> String {
        let mut prompt = format!(
            r#"Here is a user-given task and the agent steps: {}. Now here is the plot that was made.
Please check that the reasoning process and plot are correct: do they correctly answer the given task?
First list reasons why yes/no, then write your final decision: PASS in caps lock if it is satisfactory, FAIL if it is not.
Don't be harsh: if the plot mostly solves the task, it should pass.
To pass, a plot should be made using px.scatter_map and not any other method (scatter_map looks nicer).
Also, any run that invents numbers should fail."#,
            succinct_steps
        );
        if self.mode == VerdictMode::Strict {
            prompt.push_str(
                "\nEnd your answer with a single line of the form `DECISION: PASS` or `DECISION: FAIL`.",
            );
        }
        prompt
    }
}

#[async_trait]
impl FinalAnswerCheck for PlotVerifier {
    fn name(&self) -> &str {
        "check_reasoning_and_plot"
    }

    async fn check(&self, _answer: &FinalAnswer, memory: &AgentMemory) -> Result<(), CheckError> {
        self.transition(CheckState::LoadingArtifact);

        if !self.artifact_path.is_file() {
            self.transition(CheckState::Rejected);
            return Err(CheckError::ArtifactMissing(format!(
                "Make sure to save the plot under {}!",
                self.artifact_name()
            )));
        }

        let image = match self.load_png_base64(&self.artifact_path).await {
            Ok(image) => image,
            Err(e) => {
                self.transition(CheckState::Rejected);
                return Err(e);
            }
        };

        self.transition(CheckState::Critiquing);
        let prompt = self.critique_prompt(&memory.succinct_steps());
        let critique = match self.provider.analyze_image(&image, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                self.transition(CheckState::Rejected);
                return Err(CheckError::Provider(e));
            }
        };

        tracing::info!("Feedback: {}", critique);

        match Verdict::parse(&critique, self.mode) {
            Verdict::Pass => {
                self.transition(CheckState::Accepted);
                Ok(())
            }
            Verdict::Fail => {
                self.transition(CheckState::Rejected);
                Err(CheckError::Rejected { critique })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedProvider;
    use serde_json::json;

    fn write_png(path: &Path) {
        image::RgbImage::from_pixel(4, 4, image::Rgb([30, 120, 200]))
            .save(path)
            .unwrap();
    }

    fn answer() -> FinalAnswer {
        FinalAnswer::classify(json!("saved_map.png"), None)
    }

    #[test]
    fn test_substring_verdicts() {
        assert_eq!(Verdict::parse("PASS, looks great", VerdictMode::Substring), Verdict::Pass);
        assert_eq!(
            Verdict::parse("Reasons: numbers are invented. FAIL", VerdictMode::Substring),
            Verdict::Fail
        );
        // Any occurrence counts, even inside a word
        assert_eq!(
            Verdict::parse("epic FAILure avoided, PASS", VerdictMode::Substring),
            Verdict::Fail
        );
    }

    #[test]
    fn test_strict_verdicts() {
        assert_eq!(
            Verdict::parse("No FAILures here.\nDECISION: PASS", VerdictMode::Strict),
            Verdict::Pass
        );
        assert_eq!(
            Verdict::parse("DECISION: PASS\nOn reflection...\nDECISION: FAIL", VerdictMode::Strict),
            Verdict::Fail
        );
        assert_eq!(Verdict::parse("PASS", VerdictMode::Strict), Verdict::Fail);
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_before_review() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::default().with_vision_replies(["PASS"]));
        let verifier = PlotVerifier::new(
            provider.clone(),
            dir.path().join("saved_map.png"),
            VerdictMode::Substring,
        );

        let err = verifier
            .check(&answer(), &AgentMemory::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Make sure to save the plot under saved_map.png!");
        assert!(provider.requests().is_empty());
        assert_eq!(verifier.state(), CheckState::Rejected);
    }

    #[tokio::test]
    async fn test_accepts_on_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_map.png");
        write_png(&path);

        let provider = Arc::new(ScriptedProvider::default().with_vision_replies(["Looks right. PASS"]));
        let verifier = PlotVerifier::new(provider.clone(), &path, VerdictMode::Substring);
        verifier.check(&answer(), &AgentMemory::new("system")).await.unwrap();

        assert_eq!(verifier.state(), CheckState::Accepted);
        let prompt = provider.requests()[0][0].text();
        assert!(prompt.contains("px.scatter_map"));
    }

    #[tokio::test]
    async fn test_rejects_with_full_critique() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_map.png");
        write_png(&path);

        let provider = Arc::new(
            ScriptedProvider::default().with_vision_replies(["Used scatter_geo instead. FAIL"]),
        );
        let verifier = PlotVerifier::new(provider, &path, VerdictMode::Substring);
        let err = verifier
            .check(&answer(), &AgentMemory::default())
            .await
            .unwrap_err();

        match err {
            CheckError::Rejected { critique } => {
                assert_eq!(critique, "Used scatter_geo instead. FAIL")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(verifier.state(), CheckState::Rejected);
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_map.png");
        std::fs::write(&path, b"not an image").unwrap();

        let provider = Arc::new(ScriptedProvider::default());
        let verifier = PlotVerifier::new(provider, &path, VerdictMode::Substring);
        let err = verifier
            .check(&answer(), &AgentMemory::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::ArtifactUnreadable { .. }));
    }
}
