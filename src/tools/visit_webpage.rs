//! Webpage visiting tool
//!
//! Fetches a URL, converts the HTML to Markdown and bounds the result length.
//! Failures are reported to the model as text instead of aborting the step.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::markdown::{html_to_markdown, prepare_page_text};
use super::traits::{required_str, Tool};
use super::types::{ToolDescriptor, ToolError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_CHARS: usize = 40_000;

pub const TIMEOUT_MESSAGE: &str =
    "The request timed out. Please try again later or check the URL.";

/// Why a fetch did not produce page text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    /// Connection, status or URL problems
    Request(String),
    Unexpected(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Timeout => write!(f, "{}", TIMEOUT_MESSAGE),
            FetchFailure::Request(e) => write!(f, "Error fetching the webpage: {}", e),
            FetchFailure::Unexpected(e) => write!(f, "An unexpected error occurred: {}", e),
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchFailure::Timeout
        } else if e.is_decode() || e.is_body() {
            FetchFailure::Unexpected(e.to_string())
        } else {
            FetchFailure::Request(e.to_string())
        }
    }
}

pub struct VisitWebpageTool {
    client: Client,
    max_chars: usize,
}

impl VisitWebpageTool {
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("city-scout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::Service(e.to_string()))?;
        Ok(Self { client, max_chars })
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let parsed = url::Url::parse(url.trim())
            .map_err(|e| FetchFailure::Request(format!("Invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchFailure::Request(format!(
                "Unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_lowercase();
        if !(content_type.starts_with("text/")
            || content_type.contains("html")
            || content_type.contains("xml")
            || content_type.contains("json"))
        {
            return Err(FetchFailure::Unexpected(format!(
                "unsupported content type {}",
                content_type
            )));
        }

        let body = response.text().await?;
        Ok(body)
    }

    /// Visit a page and return its Markdown text, or a descriptive error string
    pub async fn visit(&self, url: &str) -> String {
        match self.fetch(url).await {
            Ok(html) => {
                let text = prepare_page_text(&html_to_markdown(&html), self.max_chars);
                tracing::debug!("Visited {} ({} chars)", url, text.chars().count());
                text
            }
            Err(failure) => {
                tracing::warn!("Failed to visit {}: {}", url, failure);
                failure.to_string()
            }
        }
    }
}

#[async_trait]
impl Tool for VisitWebpageTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::single_string(
            "visit_webpage",
            "Visits a webpage at the given URL and returns its content as a markdown string.",
            "url",
            "The URL of the webpage to visit.",
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let url = required_str(&arguments, "url")?;
        Ok(self.visit(url).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> VisitWebpageTool {
        VisitWebpageTool::new(Duration::from_secs(2), DEFAULT_MAX_CHARS).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported_not_raised() {
        let text = tool().visit("not a url").await;
        assert!(text.starts_with("Error fetching the webpage:"));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let text = tool().visit("ftp://example.com/file").await;
        assert!(text.contains("Unsupported URL scheme 'ftp'"));
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(FetchFailure::Timeout.to_string(), TIMEOUT_MESSAGE);
        assert_eq!(
            FetchFailure::Unexpected("boom".into()).to_string(),
            "An unexpected error occurred: boom"
        );
    }
}
