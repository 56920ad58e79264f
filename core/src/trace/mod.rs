//! Model invocation tracing.
//!
//! Every model call runs inside a span; spans nest under a per-request root
//! and ship to an external backend without ever blocking or failing the
//! request path. `SpanGuard` is RAII: a guard dropped before an explicit
//! `end_ok`/`end_err` ships the span with a "cancelled" outcome, so client
//! disconnects mid-generation still close every opened span.

mod sink;

pub use sink::{HttpSpanSink, SpanSink};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Terminal state of a span
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanOutcome {
    Ok,
    Error,
    Cancelled,
}

/// One completed span, ready to ship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub outcome: SpanOutcome,
    pub metadata: Value,
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_trace_id() -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now().timestamp_micros() as u128;
    format!("{:032x}", (now << 64) | counter as u128)
}

fn next_span_id() -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now().timestamp_micros() as u64;
    format!("{:016x}", now ^ counter.rotate_left(32))
}

/// Hands out span guards and owns the shipping path.
///
/// Enablement is decided once at startup from config; a disabled recorder
/// hands out guards whose lifecycle methods are no-ops, so call sites never
/// branch on whether tracing is on.
#[derive(Clone)]
pub struct TraceRecorder {
    sink: Option<Arc<dyn SpanSink>>,
}

impl TraceRecorder {
    pub fn new(enabled: bool, sink: Arc<dyn SpanSink>) -> Self {
        Self {
            sink: enabled.then_some(sink),
        }
    }

    /// Recorder whose guards never ship anything
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Open a root span for a new request
    pub fn start_span(&self, name: &str, input: Value) -> SpanGuard {
        SpanGuard::open(self.sink.clone(), next_trace_id(), None, name, input)
    }
}

/// An in-flight span. Exactly one terminal outcome per guard: `end_ok`,
/// `end_err`, or "cancelled" via Drop.
pub struct SpanGuard {
    sink: Option<Arc<dyn SpanSink>>,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    start_time_ms: i64,
    input: Value,
    metadata: Value,
    finished: bool,
}

impl SpanGuard {
    fn open(
        sink: Option<Arc<dyn SpanSink>>,
        trace_id: String,
        parent_span_id: Option<String>,
        name: &str,
        input: Value,
    ) -> Self {
        Self {
            sink,
            trace_id,
            span_id: next_span_id(),
            parent_span_id,
            name: name.to_string(),
            start_time_ms: chrono::Utc::now().timestamp_millis(),
            input,
            metadata: Value::Null,
            finished: false,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Open a child span nested under this one
    pub fn child(&self, name: &str, input: Value) -> SpanGuard {
        SpanGuard::open(
            self.sink.clone(),
            self.trace_id.clone(),
            Some(self.span_id.clone()),
            name,
            input,
        )
    }

    /// Attach a metadata field to the span
    pub fn annotate(&mut self, key: &str, value: Value) {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn end_ok(mut self, output: Value) {
        self.finish(SpanOutcome::Ok, Some(output), None);
    }

    pub fn end_err(mut self, error: &str) {
        self.finish(SpanOutcome::Error, None, Some(error.to_string()));
    }

    fn finish(&mut self, outcome: SpanOutcome, output: Option<Value>, error: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let Some(sink) = self.sink.take() else {
            return;
        };
        let record = SpanRecord {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            name: std::mem::take(&mut self.name),
            start_time_ms: self.start_time_ms,
            end_time_ms: chrono::Utc::now().timestamp_millis(),
            input: std::mem::take(&mut self.input),
            output,
            error,
            outcome,
            metadata: std::mem::take(&mut self.metadata),
        };

        // Fire and forget. Shipping must never block or fail the request,
        // and Drop can run outside a runtime (e.g. in sync teardown).
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = sink.ship(record).await {
                    debug!(target = "trace", error = %e, "Span shipping failed");
                }
            });
        } else {
            debug!(target = "trace", "No runtime available; span dropped");
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(SpanOutcome::Cancelled, None, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<SpanRecord>);

    #[async_trait]
    impl SpanSink for ChannelSink {
        async fn ship(&self, record: SpanRecord) -> Result<()> {
            let _ = self.0.send(record);
            Ok(())
        }
    }

    fn recorder() -> (TraceRecorder, mpsc::UnboundedReceiver<SpanRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TraceRecorder::new(true, Arc::new(ChannelSink(tx))), rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<SpanRecord>) -> SpanRecord {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("span not shipped")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_end_ok_ships_record() {
        let (recorder, mut rx) = recorder();
        let mut span = recorder.start_span("generation", json!({"q": "hello"}));
        span.annotate("model", json!("test-model"));
        span.end_ok(json!({"text": "hi"}));

        let record = recv(&mut rx).await;
        assert_eq!(record.name, "generation");
        assert_eq!(record.outcome, SpanOutcome::Ok);
        assert_eq!(record.output, Some(json!({"text": "hi"})));
        assert_eq!(record.metadata["model"], "test-model");
        assert!(record.parent_span_id.is_none());
        assert!(record.end_time_ms >= record.start_time_ms);
    }

    #[tokio::test]
    async fn test_end_err_ships_error_outcome() {
        let (recorder, mut rx) = recorder();
        let span = recorder.start_span("generation", json!({}));
        span.end_err("provider timeout");

        let record = recv(&mut rx).await;
        assert_eq!(record.outcome, SpanOutcome::Error);
        assert_eq!(record.error.as_deref(), Some("provider timeout"));
        assert!(record.output.is_none());
    }

    #[tokio::test]
    async fn test_drop_ships_cancelled() {
        let (recorder, mut rx) = recorder();
        {
            let _span = recorder.start_span("generation", json!({}));
            // dropped without an explicit end
        }
        let record = recv(&mut rx).await;
        assert_eq!(record.outcome, SpanOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_child_shares_trace_and_links_parent() {
        let (recorder, mut rx) = recorder();
        let root = recorder.start_span("conversation", json!({}));
        let root_trace = root.trace_id().to_string();
        let root_span = root.span_id().to_string();

        let child = root.child("generation", json!({}));
        assert_ne!(child.span_id(), root.span_id());
        let child_span = child.span_id().to_string();
        child.end_ok(json!({}));
        root.end_ok(json!({}));

        // Shipping is async; the two records may arrive in either order.
        let records = vec![recv(&mut rx).await, recv(&mut rx).await];
        let child_rec = records.iter().find(|r| r.span_id == child_span).unwrap();
        assert_eq!(child_rec.trace_id, root_trace);
        assert_eq!(
            child_rec.parent_span_id.as_deref(),
            Some(root_span.as_str())
        );
        let root_rec = records.iter().find(|r| r.span_id == root_span).unwrap();
        assert_eq!(root_rec.outcome, SpanOutcome::Ok);
        assert!(root_rec.parent_span_id.is_none());
    }

    #[tokio::test]
    async fn test_disabled_recorder_ships_nothing() {
        let recorder = TraceRecorder::disabled();
        assert!(!recorder.is_enabled());
        let span = recorder.start_span("generation", json!({}));
        span.end_ok(json!({}));
        // no sink, nothing to assert beyond not panicking
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(next_trace_id(), next_trace_id());
        assert_ne!(next_span_id(), next_span_id());
        assert_eq!(next_trace_id().len(), 32);
        assert_eq!(next_span_id().len(), 16);
    }
}
