use crate::config::ModelConfig;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use super::{ChatCompletion, ChatModel, ChatRequest};

/// HTTP client for OpenAI-compatible Chat Completions backends
#[derive(Clone)]
pub struct OpenAiChatClient {
    http: Client,
    cfg: ModelConfig,
}

impl OpenAiChatClient {
    pub fn new(cfg: ModelConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ModelConfig::default())
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    /// Generate a completion for the given request.
    /// Contract:
    /// - Input: ChatRequest (messages + optional response_format)
    /// - Output: ChatCompletion with assistant text
    /// - Error: Provider on network failure, timeout, or non-success status
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        debug!(target = "llm_client", model = %self.cfg.model, "POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let mut body = json!({
            "model": self.cfg.model,
            "messages": request.messages,
            "temperature": self.cfg.temperature,
        });
        if let Some(format) = &request.response_format {
            body["response_format"] = format.clone();
        }

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Provider(format!("Chat Completions request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(target = "llm_client", %status, body = %text, "Chat Completions error");
            return Err(RelayError::Provider(format!(
                "Chat Completions error: status={} body={}",
                status, text
            )));
        }

        let val: serde_json::Value = resp.json().await.map_err(|e| {
            RelayError::Provider(format!("Failed to parse Chat Completions JSON: {e}"))
        })?;
        let text = extract_text(&val).ok_or_else(|| {
            RelayError::Provider("Missing choices[0].message.content in chat completions".into())
        })?;
        Ok(ChatCompletion {
            text,
            model: val
                .get("model")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            usage: val.get("usage").cloned(),
        })
    }
}

fn extract_text(v: &serde_json::Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}
