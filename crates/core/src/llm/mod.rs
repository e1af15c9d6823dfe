pub mod anthropic;
pub mod error;
pub mod text;

use crate::domain::chat::ChatMessage;

/// One completion: a system prompt and the conversation so far.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Falls back to the client's configured ceiling.
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String>;
}
