//! Route handlers and transport-level error mapping.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use relay_core::llm::ChatMessage;
use relay_core::media::{UploadedImage, VideoRequest, VideoService};
use relay_core::orchestrator::Flow;
use relay_core::retrieval::ContextRetriever;
use relay_core::{ChatOrchestrator, RelayError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<ChatOrchestrator>,
    retriever: Arc<ContextRetriever>,
    video: Arc<VideoService>,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ChatOrchestrator>,
        retriever: Arc<ContextRetriever>,
        video: Arc<VideoService>,
        cfg: &relay_core::RelayConfig,
    ) -> relay_core::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.ingest.http_timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            orchestrator,
            retriever,
            video,
            http,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/", get(ping))
        .route("/chat/conversation", get(conversation))
        .route("/chat/ingest-items", post(ingest_items))
        .route("/video/generate", post(generate_video))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

// =========================
// Conversation (WebSocket)
// =========================

#[derive(Debug, Deserialize)]
struct TurnFrame {
    message: String,
    #[serde(default)]
    flow: Option<Flow>,
}

fn parse_turn(text: &str) -> TurnFrame {
    // Structured frames pick a flow; bare text defaults to Auto
    serde_json::from_str::<TurnFrame>(text).unwrap_or_else(|_| TurnFrame {
        message: text.to_string(),
        flow: None,
    })
}

async fn conversation(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| conversation_loop(socket, state))
}

/// One connection, one conversation. The in-flight turn is raced against
/// the socket so a disconnect (or a superseding frame) drops the turn
/// future mid-generation instead of finishing work nobody will read.
async fn conversation_loop(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut history: Vec<ChatMessage> = Vec::new();
    let conversation_id = next_conversation_id();
    info!(target = "server", conversation = %conversation_id, "Conversation opened");

    let mut pending: Option<String> = receiver_next_text(&mut receiver).await;
    while let Some(text) = pending.take() {
        let turn = parse_turn(&text);
        let flow = turn.flow.unwrap_or(Flow::Auto);

        let fut = state
            .orchestrator
            .handle(history.clone(), &turn.message, flow);
        tokio::pin!(fut);

        let outcome = loop {
            tokio::select! {
                result = &mut fut => break Some(result),
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(t))) => {
                        debug!(target = "server", "Turn superseded by a new frame");
                        pending = Some(t.to_string());
                        break None;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        info!(target = "server", conversation = %conversation_id, "Client left mid-turn");
                        return;
                    }
                    Some(Ok(_)) => continue,
                },
            }
        };

        if let Some(result) = outcome {
            let mut frame = match result {
                Ok(resp) => {
                    history.push(ChatMessage::user(turn.message.clone()));
                    history.push(ChatMessage::assistant(resp.text.clone()));
                    json!(resp)
                }
                Err(e) => {
                    warn!(target = "server", conversation = %conversation_id, error = %e, "Conversation turn failed");
                    json!({"error": {"code": e.code(), "message": e.to_string()}})
                }
            };
            frame["conversation_id"] = json!(conversation_id);
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
            pending = receiver_next_text(&mut receiver).await;
        }
    }
}

fn next_conversation_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), counter)
}

async fn receiver_next_text(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<String> {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(t)) => return Some(t.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

// =========================
// Ingestion
// =========================

#[derive(Debug, Deserialize)]
struct IngestRequest {
    url: String,
}

async fn ingest_items(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Response, AppError> {
    if req.url.trim().is_empty() {
        return Err(RelayError::InvalidRequest("url must be non-empty".into()).into());
    }

    let resp = state.http.get(&req.url).send().await.map_err(|e| AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_unavailable",
        message: format!("Failed to fetch {}: {e}", req.url),
    })?;
    if !resp.status().is_success() {
        return Err(AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_unavailable",
            message: format!("Upstream returned status {}", resp.status()),
        });
    }
    let raw = resp.text().await.map_err(|e| AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_unavailable",
        message: format!("Failed to read upstream body: {e}"),
    })?;

    let digest = state.orchestrator.summarize_articles(&raw).await?;
    let entries: Vec<(String, serde_json::Value)> = digest
        .items
        .iter()
        .map(|item| {
            (
                format!("{}\n\n{}", item.title, item.summary),
                json!({
                    "title": item.title,
                    "source": item.source,
                }),
            )
        })
        .collect();
    let stored = state.retriever.store(entries).await?;

    info!(target = "server", stored, url = %req.url, "Ingestion complete");
    Ok((
        StatusCode::OK,
        Json(json!({"stored": stored, "items": digest.items})),
    )
        .into_response())
}

// =========================
// Video generation
// =========================

async fn generate_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut payload: Option<VideoRequest> = None;
    let mut images: Vec<UploadedImage> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "invalid_request",
        message: format!("Malformed multipart body: {e}"),
    })? {
        match field.name() {
            Some("payload") => {
                let text = field.text().await.map_err(|e| AppError {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    code: "invalid_request",
                    message: format!("Unreadable payload part: {e}"),
                })?;
                payload = Some(serde_json::from_str(&text).map_err(|e| AppError {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    code: "invalid_request",
                    message: format!("Invalid payload JSON: {e}"),
                })?);
            }
            Some("product_images") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(|s| s.to_string());
                let content = field.bytes().await.map_err(|e| AppError {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    code: "invalid_request",
                    message: format!("Unreadable image part '{}': {e}", filename),
                })?;
                images.push(UploadedImage {
                    filename,
                    content: content.to_vec(),
                    content_type,
                });
            }
            _ => continue,
        }
    }

    let request = payload.ok_or_else(|| AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "invalid_request",
        message: "Missing 'payload' part".into(),
    })?;

    let result = state.video.generate(&request, &images).await?;
    Ok((StatusCode::CREATED, Json(json!(result))).into_response())
}

// =========================
// Error mapping
// =========================

/// Transport-level error: a status plus the `{"error": {...}}` body
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        let status = match &e {
            RelayError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::Provider(_)
            | RelayError::SchemaViolation(_)
            | RelayError::RemoteUnavailable(_)
            | RelayError::Retrieval(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": {"code": self.code, "message": self.message}})),
        )
            .into_response()
    }
}
