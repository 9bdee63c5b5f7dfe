//! Scripted provider
//!
//! Replays a fixed queue of chat responses and vision replies. Used for
//! offline runs of the agent loop and throughout the test suite.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ChatMessage, ChatResponse, CompletionOptions, Provider, ProviderError};
use crate::tools::ToolDescriptor;

#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ChatResponse>>,
    vision_replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Queue replies returned by `analyze_image`, in order
    pub fn with_vision_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut queue = lock(&self.vision_replies);
            queue.extend(replies.into_iter().map(Into::into));
        }
        self
    }

    /// Every message list the provider has been called with
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDescriptor],
        _options: &CompletionOptions,
    ) -> Result<ChatResponse, ProviderError> {
        lock(&self.requests).push(messages.to_vec());
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| ProviderError::NotAvailable("scripted (script exhausted)".to_string()))
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn analyze_image(
        &self,
        _base64_image: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        lock(&self.requests).push(vec![ChatMessage::user(prompt)]);
        lock(&self.vision_replies)
            .pop_front()
            .ok_or_else(|| ProviderError::NotAvailable("scripted (no vision reply)".to_string()))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_errors() {
        let provider = ScriptedProvider::new(vec![
            ChatResponse::text("first"),
            ChatResponse::text("second"),
        ]);
        assert_eq!(provider.complete("a").await.unwrap(), "first");
        assert_eq!(provider.complete("b").await.unwrap(), "second");
        assert!(provider.complete("c").await.is_err());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_vision_replies() {
        let provider = ScriptedProvider::default().with_vision_replies(["PASS"]);
        assert_eq!(provider.analyze_image("AA==", "judge").await.unwrap(), "PASS");
        assert!(provider.analyze_image("AA==", "judge").await.is_err());
    }
}
