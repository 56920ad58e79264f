// Relay Server
// HTTP/WebSocket transport over the relay-core orchestration runtime

mod routes;

use relay_core::config::RelayConfig;
use relay_core::llm::OpenAiChatClient;
use relay_core::media::{HttpVideoProvider, VideoService};
use relay_core::orchestrator::required_prompts;
use relay_core::prompt::{HttpPromptStore, PromptResolver, PromptStore, PromptTable};
use relay_core::retrieval::{ContextRetriever, OpenAiEmbedder, QdrantIndex};
use relay_core::trace::{HttpSpanSink, TraceRecorder};
use relay_core::{ChatOrchestrator, RelayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().compact().init();

    let cfg = RelayConfig::load();

    let table = Arc::new(PromptTable::from_file(&cfg.prompts_path)?);
    table.validate(required_prompts())?;

    let store: Option<Arc<dyn PromptStore>> = if cfg.prompt_store.enabled {
        Some(Arc::new(HttpPromptStore::new(cfg.prompt_store.clone())?))
    } else {
        None
    };
    let resolver = Arc::new(PromptResolver::new(table, store));

    let retriever = Arc::new(ContextRetriever::new(
        Arc::new(OpenAiEmbedder::new(cfg.embedding.clone())?),
        Arc::new(QdrantIndex::new(cfg.index.clone())?),
    ));

    let recorder = if cfg.trace.enabled {
        TraceRecorder::new(true, Arc::new(HttpSpanSink::new(cfg.trace.clone())?))
    } else {
        TraceRecorder::disabled()
    };

    let orchestrator = Arc::new(ChatOrchestrator::new(
        resolver,
        retriever.clone(),
        Arc::new(OpenAiChatClient::new(cfg.model.clone())?),
        recorder.clone(),
    ));

    let video = Arc::new(VideoService::new(
        Arc::new(HttpVideoProvider::new(cfg.media.clone())?),
        recorder,
        Duration::from_millis(cfg.media.poll_timeout_ms),
        Duration::from_millis(cfg.media.poll_interval_ms),
    ));

    let state = routes::AppState::new(orchestrator, retriever, video, &cfg)?;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .map_err(|e| RelayError::Config(format!("Failed to bind {}: {e}", cfg.server.addr)))?;
    info!(target = "server", addr = %cfg.server.addr, "Relay server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| RelayError::Config(format!("Server error: {e}")))?;
    Ok(())
}
