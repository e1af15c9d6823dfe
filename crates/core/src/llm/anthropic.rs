use crate::config::Settings;
use crate::domain::chat::ChatMessage;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{CompletionRequest, LlmClient, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const API_VERSION: &str = "2023-06-01";

/// Client for the Messages endpoint. Model, limits and host come from
/// [`LlmSettings`](crate::config::LlmSettings).
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    messages_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let llm = &settings.llm;

        let http = reqwest::Client::builder()
            .timeout(llm.timeout)
            .build()
            .context("failed to build Anthropic http client")?;

        Ok(Self {
            http,
            api_key,
            messages_url: format!("{}/v1/messages", llm.base_url.trim_end_matches('/')),
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
        })
    }

    /// Returns the decoded reply and the raw body it came from.
    async fn send(&self, body: &MessagesRequest<'_>) -> anyhow::Result<(MessagesResponse, Value)> {
        let response = self
            .http
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            return Err(LlmDiagnosticsError::http(Provider::Anthropic, status.as_u16(), text).into());
        }

        let raw: Value = serde_json::from_str(&text)
            .with_context(|| format!("Anthropic reply is not JSON: {text}"))?;
        let decoded = MessagesResponse::deserialize(&raw)
            .context("unexpected Anthropic reply shape")?;
        Ok((decoded, raw))
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            system: Some(request.system.as_str()).filter(|s| !s.is_empty()),
            messages: request.messages.iter().map(WireMessage::from).collect(),
        };

        let (reply, raw) = self.send(&body).await?;
        if reply.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(max_tokens = body.max_tokens, model = %self.model, "completion truncated at max_tokens");
        }

        let text = reply.text();
        if text.trim().is_empty() {
            return Err(LlmDiagnosticsError::empty_reply(Provider::Anthropic, raw).into());
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(m: &'a ChatMessage) -> Self {
        Self {
            role: m.role.as_str(),
            content: &m.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
}

impl MessagesResponse {
    /// Text blocks joined by newlines; tool and thinking blocks are ignored.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text.as_str()),
                Block::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
