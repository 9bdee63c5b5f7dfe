//! AI module - model providers and clients

pub mod providers;

// Re-export commonly used types
pub use providers::{
    ChatMessage, ChatResponse, CompletionOptions, ContentPart, OpenAIClient, Provider,
    ProviderError, ProviderFactory, ProviderKind, Role, ScriptedProvider,
    TokenUsage, ToolCall,
};
