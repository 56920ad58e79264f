use crate::config::TraceConfig;
use crate::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::SpanRecord;

/// Destination for completed spans. Implementations must be cheap to call
/// from spawned tasks; failures are logged by the caller, never surfaced.
#[async_trait]
pub trait SpanSink: Send + Sync {
    async fn ship(&self, record: SpanRecord) -> Result<()>;
}

/// Ships spans to an observability backend over its batch ingestion API
#[derive(Clone)]
pub struct HttpSpanSink {
    http: Client,
    cfg: TraceConfig,
}

impl HttpSpanSink {
    pub fn new(cfg: TraceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.flush_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }
}

#[async_trait]
impl SpanSink for HttpSpanSink {
    async fn ship(&self, record: SpanRecord) -> Result<()> {
        let url = format!(
            "{}/api/public/ingestion",
            self.cfg.base_url.trim_end_matches('/')
        );
        debug!(target = "trace", span = %record.name, "POST {}", url);

        let mut req = self.http.post(&url);
        if let (Some(public), Some(secret)) = (&self.cfg.public_key, &self.cfg.secret_key) {
            req = req.basic_auth(public, Some(secret));
        }

        let resp = req
            .json(&json!({ "batch": [envelope(&record)] }))
            .send()
            .await
            .map_err(|e| RelayError::RemoteUnavailable(format!("Span shipping failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError::RemoteUnavailable(format!(
                "Trace backend rejected span: status={}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn envelope(record: &SpanRecord) -> serde_json::Value {
    json!({
        "id": record.span_id,
        "type": "span-create",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "body": record,
    })
}
