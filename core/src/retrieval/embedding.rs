use crate::config::EmbeddingConfig;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::Embedder;

/// HTTP client for OpenAI-compatible embeddings backends
#[derive(Clone)]
pub struct OpenAiEmbedder {
    http: Client,
    cfg: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(cfg: EmbeddingConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.cfg.base_url.trim_end_matches('/'));
        debug!(target = "embedding", model = %self.cfg.model, "POST {}", url);

        let mut req = self.http.post(&url).header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .json(&json!({
                "model": self.cfg.model,
                "input": [text],
            }))
            .send()
            .await
            .map_err(|e| RelayError::Retrieval(format!("Embedding request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Retrieval(format!(
                "Embedding error: status={} body={}",
                status, text
            )));
        }

        let val: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Retrieval(format!("Failed to parse embedding JSON: {e}")))?;
        let vector = extract_vector(&val).ok_or_else(|| {
            RelayError::Retrieval("Missing data[0].embedding in embedding response".into())
        })?;

        if self.cfg.dimension > 0 && vector.len() != self.cfg.dimension {
            return Err(RelayError::Retrieval(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.cfg.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

fn extract_vector(v: &serde_json::Value) -> Option<Vec<f32>> {
    let arr = v.get("data")?.get(0)?.get("embedding")?.as_array()?;
    arr.iter()
        .map(|x| x.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
}
