use crate::config::MediaConfig;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{VideoJob, VideoOperation};

/// Long-running generation seam: start an operation, then poll it
#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn start(&self, job: &VideoJob) -> Result<VideoOperation>;
    async fn poll(&self, operation_id: &str) -> Result<VideoOperation>;
}

/// HTTP client for a Veo-style predictLongRunning endpoint
#[derive(Clone)]
pub struct HttpVideoProvider {
    http: Client,
    cfg: MediaConfig,
}

impl HttpVideoProvider {
    pub fn new(cfg: MediaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.api_key {
            Some(key) => req.header("x-goog-api-key", key),
            None => req,
        }
    }
}

#[async_trait]
impl VideoProvider for HttpVideoProvider {
    async fn start(&self, job: &VideoJob) -> Result<VideoOperation> {
        let url = format!(
            "{}/models/{}:predictLongRunning",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model
        );
        debug!(target = "media", model = %self.cfg.model, "POST {}", url);

        let mut instance = json!({ "prompt": job.prompt });
        if let Some(image) = &job.image {
            instance["image"] = json!({
                "bytesBase64Encoded": image.data_base64,
                "mimeType": image.mime_type,
            });
        }
        let mut parameters = json!({
            "aspectRatio": job.aspect_ratio.as_str(),
            "durationSeconds": job.duration_seconds,
        });
        if let Some(negative) = &job.negative_prompt {
            parameters["negativePrompt"] = json!(negative);
        }

        let resp = self
            .authed(self.http.post(&url))
            .json(&json!({
                "instances": [instance],
                "parameters": parameters,
            }))
            .send()
            .await
            .map_err(|e| RelayError::Provider(format!("Video start request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Provider(format!(
                "Video start error: status={} body={}",
                status, text
            )));
        }

        let val: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Provider(format!("Failed to parse start JSON: {e}")))?;
        parse_operation(&val)
    }

    async fn poll(&self, operation_id: &str) -> Result<VideoOperation> {
        // Operation ids are provider-relative resource names
        let url = format!(
            "{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            operation_id
        );
        debug!(target = "media", operation = %operation_id, "GET {}", url);

        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| RelayError::Provider(format!("Video poll request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError::Provider(format!(
                "Video poll error: status={}",
                resp.status()
            )));
        }

        let val: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Provider(format!("Failed to parse poll JSON: {e}")))?;
        parse_operation(&val)
    }
}

fn parse_operation(v: &serde_json::Value) -> Result<VideoOperation> {
    let id = v
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| RelayError::Provider("Operation response missing name".into()))?
        .to_string();
    let done = v.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    let error = v
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string());
    Ok(VideoOperation {
        id,
        done,
        video_uri: extract_video_uri(v),
        error,
    })
}

fn extract_video_uri(v: &serde_json::Value) -> Option<String> {
    v.get("response")?
        .get("generateVideoResponse")?
        .get("generatedSamples")?
        .get(0)?
        .get("video")?
        .get("uri")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pending_operation() {
        let op = parse_operation(&json!({"name": "operations/abc"})).unwrap();
        assert_eq!(op.id, "operations/abc");
        assert!(!op.done);
        assert!(op.video_uri.is_none());
        assert!(op.error.is_none());
    }

    #[test]
    fn test_parse_finished_operation() {
        let op = parse_operation(&json!({
            "name": "operations/abc",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [
                        {"video": {"uri": "https://videos/clip.mp4"}}
                    ]
                }
            }
        }))
        .unwrap();
        assert!(op.done);
        assert_eq!(op.video_uri.as_deref(), Some("https://videos/clip.mp4"));
    }

    #[test]
    fn test_parse_failed_operation() {
        let op = parse_operation(&json!({
            "name": "operations/abc",
            "done": true,
            "error": {"code": 13, "message": "internal"}
        }))
        .unwrap();
        assert_eq!(op.error.as_deref(), Some("internal"));
    }

    #[test]
    fn test_parse_missing_name_is_error() {
        assert!(parse_operation(&json!({"done": true})).is_err());
    }
}
