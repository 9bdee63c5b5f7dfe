//! AI Provider Trait and Factory
//!
//! Defines a unified interface for chat-completion backends so agents, the planner
//! and the plot verifier can share one model handle or use separate ones.
//!
//! Supported providers:
//! - OpenAI (GPT-4o)
//! - OpenAI-compatible APIs (custom base URL)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::tools::ToolDescriptor;

pub mod openai_client;
pub mod scripted;

pub use openai_client::OpenAIClient;
pub use scripted::ScriptedProvider;

// ============================================================================
// Message Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content. Images travel as base64 so they can be
/// embedded as data URIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { mime_type: String, base64: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn png(base64: impl Into<String>) -> Self {
        ContentPart::Image {
            mime_type: "image/png".to_string(),
            base64: base64.into(),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Model-assigned id, echoed back with the tool result
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    /// User message carrying a prompt and one PNG image
    pub fn user_with_image(text: impl Into<String>, png_base64: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text), ContentPart::png(png_base64)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.map(ContentPart::text).into_iter().collect(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Concatenated text parts (images are skipped)
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the model name
    fn model(&self) -> &str;

    /// Run one chat completion. `tools` may be empty for plain text turns.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        options: &CompletionOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Generate a text completion for a single user prompt
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self
            .chat(&[ChatMessage::user(prompt)], &[], &CompletionOptions::default())
            .await?;
        response
            .content
            .ok_or_else(|| ProviderError::APIError("No content in response".to_string()))
    }

    /// Check if this provider supports vision
    fn supports_vision(&self) -> bool;

    /// Analyze a PNG image (if vision supported)
    async fn analyze_image(
        &self,
        base64_image: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        if !self.supports_vision() {
            return Err(ProviderError::VisionNotSupported(self.name().to_string()));
        }
        let message = ChatMessage::user_with_image(prompt, base64_image);
        let response = self
            .chat(&[message], &[], &CompletionOptions::default())
            .await?;
        response
            .content
            .ok_or_else(|| ProviderError::APIError("No content in response".to_string()))
    }
}

// ============================================================================
// Request Options and Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: Some(8096),
            top_p: None,
            stop: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderError {
    NotConfigured(String),
    NotAvailable(String),
    RateLimited(String),
    InvalidRequest(String),
    APIError(String),
    VisionNotSupported(String),
    NetworkError(String),
    Timeout,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::NotConfigured(p) => write!(f, "Model provider '{}' is missing settings", p),
            ProviderError::NotAvailable(p) => write!(f, "Model provider '{}' is unavailable", p),
            ProviderError::RateLimited(msg) => write!(f, "Rate limited by model endpoint: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Bad model request: {}", msg),
            ProviderError::APIError(msg) => write!(f, "Model endpoint error: {}", msg),
            ProviderError::VisionNotSupported(p) => write!(f, "Model '{}' cannot read images", p),
            ProviderError::NetworkError(msg) => write!(f, "Could not reach model endpoint: {}", msg),
            ProviderError::Timeout => write!(f, "Model request timed out"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}

// ============================================================================
// Provider Type Enum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Custom,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Custom => write!(f, "custom"),
        }
    }
}

impl ProviderKind {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAI),
            "custom" => Some(ProviderKind::Custom),
            _ => None,
        }
    }
}

// ============================================================================
// Provider Factory
// ============================================================================

pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a provider from configuration
    pub fn create(
        kind: ProviderKind,
        api_key: Option<&str>,
        model: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        match kind {
            ProviderKind::OpenAI => {
                let api_key =
                    api_key.ok_or_else(|| ProviderError::NotConfigured("openai".to_string()))?;
                let model = model.unwrap_or("gpt-4o");
                Ok(Arc::new(
                    OpenAIClient::new(api_key, model, base_url)?.with_timeout(timeout)?,
                ))
            }
            ProviderKind::Custom => {
                let api_key =
                    api_key.ok_or_else(|| ProviderError::NotConfigured("custom".to_string()))?;
                let model = model.unwrap_or("gpt-4o");
                let base_url =
                    base_url.ok_or_else(|| ProviderError::NotConfigured("custom".to_string()))?;
                Ok(Arc::new(
                    OpenAIClient::new(api_key, model, Some(base_url))?.with_timeout(timeout)?,
                ))
            }
        }
    }
}
