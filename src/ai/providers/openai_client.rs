//! OpenAI Compatible Client
//!
//! Supports OpenAI API and any OpenAI-compatible API (custom endpoints, local models, etc.)
//! Tools are sent as function definitions; images as `image_url` data URIs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ChatMessage, ChatResponse, CompletionOptions, ContentPart, Provider, ProviderError,
    Role, TokenUsage, ToolCall,
};
use crate::tools::ToolDescriptor;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self, ProviderError> {
        let base_url = base_url.unwrap_or(DEFAULT_BASE_URL);

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Rebuild the HTTP client with a different request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        options: &CompletionOptions,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        });

        if let Some(max_tokens) = options.max_tokens {
            body["max_completion_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(ref stop) = options.stop {
            body["stop"] = json!(stop);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

/// Convert one message to the chat-completions wire shape
fn message_to_wire(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let has_image = message
        .content
        .iter()
        .any(|part| matches!(part, ContentPart::Image { .. }));

    let content = if message.content.is_empty() {
        Value::Null
    } else if has_image {
        Value::Array(
            message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { mime_type, base64 } => json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{};base64,{}", mime_type, base64)}
                    }),
                })
                .collect(),
        )
    } else {
        Value::String(message.text())
    };

    let mut wire = json!({"role": role, "content": content});

    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(ref id) = message.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }

    wire
}

fn tool_to_wire(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

fn parse_response(response: OpenAIResponse) -> Result<ChatResponse, ProviderError> {
    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
    });

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ProviderError::APIError("No choices in response".to_string()))?;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Models occasionally emit arguments that are not valid JSON; keep them as a string
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }
        })
        .collect::<Vec<_>>();

    if message.content.is_none() && tool_calls.is_empty() {
        return Err(ProviderError::APIError("No content in response".to_string()));
    }

    Ok(ChatResponse {
        content: message.content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl Provider for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        options: &CompletionOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, tools, options);

        tracing::debug!(
            "POST {} ({} messages, {} tools)",
            url,
            messages.len(),
            tools.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited(text));
            }
            return Err(ProviderError::APIError(format!(
                "Status {}: {}",
                status, text
            )));
        }

        let response: OpenAIResponse = response.json().await?;
        parse_response(response)
    }

    fn supports_vision(&self) -> bool {
        // Text-only families; everything current accepts image parts
        !(self.model.starts_with("gpt-3.5") || self.model.starts_with("o1-mini"))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OpenAIClient::new("test-key", "gpt-4o", None);
        assert!(client.is_ok());

        let client = client.unwrap();
        assert_eq!(client.name(), "openai");
        assert_eq!(client.model(), "gpt-4o");
        assert!(client.supports_vision());
    }

    #[test]
    fn test_custom_base_url() {
        let client = OpenAIClient::new("test-key", "gpt-4o", Some("http://localhost:8080/v1/"));
        assert!(client.is_ok());

        let client = client.unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_image_message_wire_format() {
        let wire = message_to_wire(&ChatMessage::user_with_image("judge this", "QUJD"));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "text");
        assert_eq!(
            wire["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn test_tool_call_round_trip_shape() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "web_search".to_string(),
            arguments: json!({"query": "largest cities"}),
        };
        let assistant = message_to_wire(&ChatMessage::assistant(None, vec![call]));
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "web_search");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"largest cities"}"#
        );

        let result = message_to_wire(&ChatMessage::tool_result("call_1", "[]"));
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_1");
        assert_eq!(result["content"], "[]");
    }

    #[test]
    fn test_request_body_includes_tools_and_token_limit() {
        let client = OpenAIClient::new("k", "gpt-4o", None).unwrap();
        let tools = vec![ToolDescriptor::single_string(
            "web_search",
            "Searches the web for your query.",
            "query",
            "Your query",
        )];
        let body = client.request_body(
            &[ChatMessage::user("hi")],
            &tools,
            &CompletionOptions::default(),
        );
        assert_eq!(body["max_completion_tokens"], 8096);
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
        assert!(body.get("temperature").is_none());
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_request_body_sampling_options() {
        let client = OpenAIClient::new("k", "gpt-4o", None).unwrap();
        let options = CompletionOptions {
            top_p: Some(0.9),
            stop: Some(vec!["Observation:".to_string()]),
            ..CompletionOptions::default()
        };
        let body = client.request_body(&[ChatMessage::user("hi")], &[], &options);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["stop"][0], "Observation:");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_tool_call_response() {
        let raw = r#"{
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "visit_webpage", "arguments": "{\"url\": \"https://example.com\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let response: OpenAIResponse = serde_json::from_str(raw).unwrap();
        let parsed = parse_response(response).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].arguments["url"], "https://example.com");
        assert_eq!(parsed.usage.unwrap().total(), 15);
    }

    #[test]
    fn test_parse_empty_response_is_error() {
        let raw = r#"{"choices": [{"message": {"content": null}}]}"#;
        let response: OpenAIResponse = serde_json::from_str(raw).unwrap();
        assert!(parse_response(response).is_err());
    }
}
