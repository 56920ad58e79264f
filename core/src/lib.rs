// Relay Core Library
// Conversational backend orchestration runtime

pub mod config;
pub mod llm;
pub mod media;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod schema;
pub mod trace;

// Export core types
pub use config::RelayConfig;
pub use llm::{ChatMessage, ChatModel, ChatRequest, Role};
pub use orchestrator::{ChatOrchestrator, ChatResponse, Flow};
pub use prompt::{PromptResolver, PromptSource, PromptTable};
pub use retrieval::{ContextRetriever, RetrievedPassage};
pub use trace::{SpanGuard, TraceRecorder};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote dependency unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Machine-readable error code for transport-layer status mapping
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "configuration_error",
            RelayError::RemoteUnavailable(_) => "remote_unavailable",
            RelayError::Retrieval(_) => "retrieval_failure",
            RelayError::Provider(_) => "provider_error",
            RelayError::SchemaViolation(_) => "schema_violation",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::IoError(_) => "io_error",
            RelayError::SerializationError(_) => "serialization_error",
        }
    }
}
