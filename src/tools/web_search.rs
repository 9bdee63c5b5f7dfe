//! Web search tool backed by the Tavily search API

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::traits::{required_str, Tool};
use super::types::{ToolDescriptor, ToolError};

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.tavily.com/search";
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebSearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Service(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
        })
    }

    /// Point the tool at a different search endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Run one search and return the `results` array as JSON text
    pub async fn search(&self, query: &str) -> Result<String, ToolError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
        }

        tracing::debug!("Searching the web for: {}", query);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(format!("search for '{}'", query))
                } else {
                    ToolError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Service(format!("Status {}: {}", status, body)));
        }

        let results: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Service(format!("Malformed search response: {}", e)))?;

        match results.get("results") {
            Some(Value::Array(items)) => {
                tracing::debug!("Search returned {} results", items.len());
                Ok(Value::Array(items.clone()).to_string())
            }
            _ => Err(ToolError::Service(
                "Search response has no results array".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::single_string(
            "web_search",
            "Searches the web for your query.",
            "query",
            "Your query",
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let query = required_str(&arguments, "query")?;
        self.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let tool = WebSearchTool::new("key", DEFAULT_SEARCH_TIMEOUT).unwrap();
        let err = tool.execute(json!({"query": "   "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_missing_query_rejected() {
        let tool = WebSearchTool::new("key", DEFAULT_SEARCH_TIMEOUT).unwrap();
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_descriptor() {
        let tool = WebSearchTool::new("key", DEFAULT_SEARCH_TIMEOUT).unwrap();
        let descriptor = tool.descriptor();
        assert_eq!(descriptor.name, "web_search");
        assert_eq!(descriptor.output_type, "string");
    }
}
