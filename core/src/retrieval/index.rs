use crate::config::IndexConfig;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{IndexPoint, RetrievedPassage, VectorIndex};

/// Qdrant REST client scoped to a single collection
#[derive(Clone)]
pub struct QdrantIndex {
    http: Client,
    cfg: IndexConfig,
}

impl QdrantIndex {
    pub fn new(cfg: IndexConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}/{}",
            self.cfg.url.trim_end_matches('/'),
            self.cfg.collection,
            suffix
        )
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>> {
        let url = self.collection_url("points/search");
        debug!(target = "vector_index", collection = %self.cfg.collection, k, "POST {}", url);

        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|e| RelayError::Retrieval(format!("Index search request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Retrieval(format!(
                "Index search error: status={} body={}",
                status, text
            )));
        }

        let val: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Retrieval(format!("Failed to parse search JSON: {e}")))?;
        Ok(parse_search_result(&val))
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        let url = self.collection_url("points");
        debug!(target = "vector_index", collection = %self.cfg.collection, count = points.len(), "PUT {}", url);

        let body: Vec<serde_json::Value> = points
            .into_iter()
            .map(|p| {
                let mut payload = p.payload;
                payload["text"] = json!(p.text);
                json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": payload,
                })
            })
            .collect();

        let resp = self
            .http
            .put(&url)
            .query(&[("wait", "true")])
            .json(&json!({ "points": body }))
            .send()
            .await
            .map_err(|e| RelayError::Retrieval(format!("Index upsert request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Retrieval(format!(
                "Index upsert error: status={} body={}",
                status, text
            )));
        }
        Ok(())
    }
}

fn parse_search_result(v: &serde_json::Value) -> Vec<RetrievedPassage> {
    let Some(hits) = v.get("result").and_then(|r| r.as_array()) else {
        return Vec::new();
    };
    hits.iter()
        .filter_map(|hit| {
            let text = hit
                .get("payload")?
                .get("text")?
                .as_str()?
                .to_string();
            let score = hit.get("score")?.as_f64()? as f32;
            let source_id = match hit.get("id") {
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => return None,
            };
            Some(RetrievedPassage {
                text,
                score,
                source_id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_result() {
        let val = json!({
            "result": [
                {"id": 7, "score": 0.91, "payload": {"text": "first"}},
                {"id": "abc", "score": 0.42, "payload": {"text": "second"}},
            ]
        });
        let passages = parse_search_result(&val);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source_id, "7");
        assert_eq!(passages[0].text, "first");
        assert_eq!(passages[1].source_id, "abc");
    }

    #[test]
    fn test_parse_search_result_skips_malformed() {
        let val = json!({
            "result": [
                {"id": 1, "score": 0.9},
                {"id": 2, "score": 0.8, "payload": {"text": "ok"}},
            ]
        });
        let passages = parse_search_result(&val);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "ok");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_search_result(&json!({})).is_empty());
        assert!(parse_search_result(&json!({"result": []})).is_empty());
    }
}
