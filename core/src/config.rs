//! Runtime configuration for the Relay core.
//!
//! Every section starts from env-driven defaults and can be overlaid by an
//! optional TOML file (path via `RELAY_CONFIG`, default `relay.toml`). All
//! external-dependency timeout ceilings live here so that no component needs
//! ambient global state.

use std::fs;
use std::path::Path;

/// High-level configuration for the Relay backend
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub model: ModelConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub prompt_store: PromptStoreConfig,
    pub trace: TraceConfig,
    pub media: MediaConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    /// Path to the declarative prompt table (TOML)
    pub prompts_path: String,
}

/// Chat model provider (OpenAI-compatible chat/completions endpoint)
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub temperature: f32,
}

/// Embedding provider used by the context retriever
#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub dimension: usize,
}

/// Vector index service (Qdrant REST API)
#[derive(Clone, Debug)]
pub struct IndexConfig {
    pub url: String,
    pub collection: String,
    pub request_timeout_ms: u64,
}

/// Remote prompt store. When disabled, resolution always uses the local
/// fallback templates.
#[derive(Clone, Debug)]
pub struct PromptStoreConfig {
    pub enabled: bool,
    pub base_url: String,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub fetch_timeout_ms: u64,
}

/// Observability backend for trace spans
#[derive(Clone, Debug)]
pub struct TraceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub flush_timeout_ms: u64,
}

/// Generative video provider
#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    /// Ceiling for the long-running generation operation
    pub poll_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

/// Large-content ingestion (single tunable ceiling for the slowest case)
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub http_timeout_ms: u64,
}

/// Transport binding
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: env_str("LLM_BASE_URL", "https://api.openai.com/v1"),
            model: env_str("LLM_MODEL", "gpt-4o-mini"),
            api_key: env_opt("LLM_API_KEY"),
            request_timeout_ms: env_u64("LLM_REQUEST_TIMEOUT_MS", 30_000),
            temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.7),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: env_str("EMBEDDING_BASE_URL", "https://api.openai.com/v1"),
            model: env_str("EMBEDDING_MODEL", "text-embedding-3-small"),
            api_key: env_opt("LLM_API_KEY"),
            request_timeout_ms: env_u64("EMBEDDING_REQUEST_TIMEOUT_MS", 15_000),
            dimension: env_u64("EMBEDDING_DIM", 1536) as usize,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: env_str("QDRANT_URL", "http://localhost:6333"),
            collection: env_str("QDRANT_COLLECTION", "relay_passages"),
            request_timeout_ms: env_u64("QDRANT_REQUEST_TIMEOUT_MS", 10_000),
        }
    }
}

impl Default for PromptStoreConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("PROMPT_STORE_ENABLED", false),
            base_url: env_str("PROMPT_STORE_URL", "http://localhost:3000"),
            public_key: env_opt("PROMPT_STORE_PUBLIC_KEY"),
            secret_key: env_opt("PROMPT_STORE_SECRET_KEY"),
            fetch_timeout_ms: env_u64("PROMPT_FETCH_TIMEOUT_MS", 3_000),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("TRACING_ENABLED", false),
            base_url: env_str("TRACE_BACKEND_URL", "http://localhost:3000"),
            public_key: env_opt("TRACE_PUBLIC_KEY"),
            secret_key: env_opt("TRACE_SECRET_KEY"),
            flush_timeout_ms: env_u64("TRACE_FLUSH_TIMEOUT_MS", 2_000),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: env_str(
                "MEDIA_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            model: env_str("MEDIA_MODEL", "veo-3.1-generate-preview"),
            api_key: env_opt("MEDIA_API_KEY"),
            request_timeout_ms: env_u64("MEDIA_REQUEST_TIMEOUT_MS", 30_000),
            poll_timeout_ms: env_u64("MEDIA_POLL_TIMEOUT_MS", 180_000),
            poll_interval_ms: env_u64("MEDIA_POLL_INTERVAL_MS", 10_000),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: env_u64("INGEST_HTTP_TIMEOUT_MS", 60_000),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: env_str("RELAY_ADDR", "0.0.0.0:8080"),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            prompt_store: PromptStoreConfig::default(),
            trace: TraceConfig::default(),
            media: MediaConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
            prompts_path: env_str("RELAY_PROMPTS", "prompts.toml"),
        }
    }
}

impl RelayConfig {
    /// Load configuration: env-driven defaults overlaid with an optional
    /// TOML file (path via RELAY_CONFIG or ./relay.toml).
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "relay.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "config", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<RelayToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target = "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RelayToml {
    pub prompts_path: Option<String>,
    pub model: Option<ModelToml>,
    pub embedding: Option<EmbeddingToml>,
    pub index: Option<IndexToml>,
    pub prompt_store: Option<RemoteToml>,
    pub trace: Option<RemoteToml>,
    pub media: Option<MediaToml>,
    pub ingest: Option<IngestToml>,
    pub server: Option<ServerToml>,
}

impl RelayToml {
    fn overlay(self, mut base: RelayConfig) -> RelayConfig {
        if let Some(p) = self.prompts_path {
            base.prompts_path = p;
        }
        if let Some(m) = self.model {
            m.apply(&mut base.model);
        }
        if let Some(e) = self.embedding {
            e.apply(&mut base.embedding);
        }
        if let Some(i) = self.index {
            i.apply(&mut base.index);
        }
        if let Some(p) = self.prompt_store {
            p.apply_prompt_store(&mut base.prompt_store);
        }
        if let Some(t) = self.trace {
            t.apply_trace(&mut base.trace);
        }
        if let Some(m) = self.media {
            m.apply(&mut base.media);
        }
        if let Some(i) = self.ingest {
            i.apply(&mut base.ingest);
        }
        if let Some(s) = self.server {
            s.apply(&mut base.server);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ModelToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
}
impl ModelToml {
    fn apply(self, m: &mut ModelConfig) {
        if let Some(x) = self.base_url {
            m.base_url = x;
        }
        if let Some(x) = self.model {
            m.model = x;
        }
        if let Some(x) = self.api_key {
            m.api_key = Some(x);
        }
        if let Some(x) = self.request_timeout_ms {
            m.request_timeout_ms = x;
        }
        if let Some(x) = self.temperature {
            m.temperature = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct EmbeddingToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub dimension: Option<usize>,
}
impl EmbeddingToml {
    fn apply(self, e: &mut EmbeddingConfig) {
        if let Some(x) = self.base_url {
            e.base_url = x;
        }
        if let Some(x) = self.model {
            e.model = x;
        }
        if let Some(x) = self.api_key {
            e.api_key = Some(x);
        }
        if let Some(x) = self.request_timeout_ms {
            e.request_timeout_ms = x;
        }
        if let Some(x) = self.dimension {
            e.dimension = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct IndexToml {
    pub url: Option<String>,
    pub collection: Option<String>,
    pub request_timeout_ms: Option<u64>,
}
impl IndexToml {
    fn apply(self, i: &mut IndexConfig) {
        if let Some(x) = self.url {
            i.url = x;
        }
        if let Some(x) = self.collection {
            i.collection = x;
        }
        if let Some(x) = self.request_timeout_ms {
            i.request_timeout_ms = x;
        }
    }
}

/// Shared shape for the prompt store and trace backend sections
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RemoteToml {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub timeout_ms: Option<u64>,
}
impl RemoteToml {
    fn apply_prompt_store(self, p: &mut PromptStoreConfig) {
        if let Some(x) = self.enabled {
            p.enabled = x;
        }
        if let Some(x) = self.base_url {
            p.base_url = x;
        }
        if let Some(x) = self.public_key {
            p.public_key = Some(x);
        }
        if let Some(x) = self.secret_key {
            p.secret_key = Some(x);
        }
        if let Some(x) = self.timeout_ms {
            p.fetch_timeout_ms = x;
        }
    }

    fn apply_trace(self, t: &mut TraceConfig) {
        if let Some(x) = self.enabled {
            t.enabled = x;
        }
        if let Some(x) = self.base_url {
            t.base_url = x;
        }
        if let Some(x) = self.public_key {
            t.public_key = Some(x);
        }
        if let Some(x) = self.secret_key {
            t.secret_key = Some(x);
        }
        if let Some(x) = self.timeout_ms {
            t.flush_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct MediaToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}
impl MediaToml {
    fn apply(self, m: &mut MediaConfig) {
        if let Some(x) = self.base_url {
            m.base_url = x;
        }
        if let Some(x) = self.model {
            m.model = x;
        }
        if let Some(x) = self.api_key {
            m.api_key = Some(x);
        }
        if let Some(x) = self.request_timeout_ms {
            m.request_timeout_ms = x;
        }
        if let Some(x) = self.poll_timeout_ms {
            m.poll_timeout_ms = x;
        }
        if let Some(x) = self.poll_interval_ms {
            m.poll_interval_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct IngestToml {
    pub http_timeout_ms: Option<u64>,
}
impl IngestToml {
    fn apply(self, i: &mut IngestConfig) {
        if let Some(x) = self.http_timeout_ms {
            i.http_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ServerToml {
    pub addr: Option<String>,
}
impl ServerToml {
    fn apply(self, s: &mut ServerConfig) {
        if let Some(x) = self.addr {
            s.addr = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_overlay() {
        let base = RelayConfig {
            model: ModelConfig {
                base_url: "http://a".into(),
                model: "m1".into(),
                api_key: None,
                request_timeout_ms: 1000,
                temperature: 0.7,
            },
            ..RelayConfig::default()
        };

        let overlay: RelayToml = toml::from_str(
            r#"
            prompts_path = "custom.toml"

            [model]
            model = "m2"
            request_timeout_ms = 5000

            [trace]
            enabled = true
            base_url = "http://traces"
            "#,
        )
        .unwrap();

        let cfg = overlay.overlay(base);
        assert_eq!(cfg.prompts_path, "custom.toml");
        assert_eq!(cfg.model.model, "m2");
        assert_eq!(cfg.model.request_timeout_ms, 5000);
        // untouched values survive the overlay
        assert_eq!(cfg.model.base_url, "http://a");
        assert!(cfg.trace.enabled);
        assert_eq!(cfg.trace.base_url, "http://traces");
    }

    #[test]
    fn test_malformed_overlay_rejected() {
        assert!(toml::from_str::<RelayToml>("model = 3").is_err());
    }
}
