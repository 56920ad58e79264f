use crate::config::PromptStoreConfig;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Remote versioned prompt source. Request by logical name plus optional
/// version label; any failure surfaces as RemoteUnavailable and is handled
/// by the resolver, never by callers.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn fetch(&self, name: &str, label: Option<&str>) -> Result<String>;
}

/// HTTP prompt store client (Langfuse-style public API)
#[derive(Clone)]
pub struct HttpPromptStore {
    http: Client,
    cfg: PromptStoreConfig,
}

impl HttpPromptStore {
    pub fn new(cfg: PromptStoreConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.fetch_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }
}

#[async_trait]
impl PromptStore for HttpPromptStore {
    async fn fetch(&self, name: &str, label: Option<&str>) -> Result<String> {
        let url = format!(
            "{}/api/public/v2/prompts/{}",
            self.cfg.base_url.trim_end_matches('/'),
            name
        );
        debug!(target = "prompt_store", prompt = %name, "GET {}", url);

        let mut req = self.http.get(&url);
        if let Some(label) = label {
            req = req.query(&[("label", label)]);
        }
        if let (Some(public), Some(secret)) = (&self.cfg.public_key, &self.cfg.secret_key) {
            req = req.basic_auth(public, Some(secret));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::RemoteUnavailable(format!("Prompt store request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(RelayError::RemoteUnavailable(format!(
                "Prompt store error for '{}': status={}",
                name, status
            )));
        }

        let val: serde_json::Value = resp.json().await.map_err(|e| {
            RelayError::RemoteUnavailable(format!("Failed to parse prompt store JSON: {e}"))
        })?;
        extract_template(&val).ok_or_else(|| {
            RelayError::RemoteUnavailable(format!("Prompt store returned no template for '{}'", name))
        })
    }
}

fn extract_template(v: &serde_json::Value) -> Option<String> {
    // Text prompts carry the template directly in "prompt"
    if let Some(s) = v.get("prompt").and_then(|p| p.as_str()) {
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    // Chat prompts carry a message array; join the content segments
    if let Some(arr) = v.get("prompt").and_then(|p| p.as_array()) {
        let joined = arr
            .iter()
            .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_text_prompt() {
        let val = json!({"name": "p", "prompt": "Answer: {query}"});
        assert_eq!(extract_template(&val).unwrap(), "Answer: {query}");
    }

    #[test]
    fn test_extract_chat_prompt() {
        let val = json!({
            "prompt": [
                {"role": "system", "content": "You are concise."},
                {"role": "user", "content": "{query}"}
            ]
        });
        assert_eq!(
            extract_template(&val).unwrap(),
            "You are concise.\n{query}"
        );
    }

    #[test]
    fn test_extract_missing() {
        assert!(extract_template(&json!({"name": "p"})).is_none());
        assert!(extract_template(&json!({"prompt": ""})).is_none());
    }
}
