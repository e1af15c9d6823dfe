use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// A failed completion, with whatever the provider sent back kept for the logs.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub status: Option<u16>,
    pub detail: String,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    pub fn http(provider: Provider, status: u16, body: String) -> Self {
        let raw_response_json = serde_json::from_str::<Value>(&body).ok();
        let detail = raw_response_json
            .as_ref()
            .and_then(|v| v.pointer("/error/message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(body);
        Self {
            provider,
            stage: "http",
            status: Some(status),
            detail,
            raw_response_json,
        }
    }

    pub fn empty_reply(provider: Provider, raw_response_json: Value) -> Self {
        Self {
            provider,
            stage: "empty_reply",
            status: None,
            detail: "response carried no text".to_string(),
            raw_response_json: Some(raw_response_json),
        }
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LLM error (provider={:?}, stage={}", self.provider, self.stage)?;
        if let Some(status) = self.status {
            write!(f, ", status={status}")?;
        }
        write!(f, "): {}", self.detail)
    }
}

impl std::error::Error for LlmDiagnosticsError {}
