//! Response orchestration: the request state machine.
//!
//! A conversation turn moves through resolve, retrieve, generate, shape.
//! Prompt resolution cannot fail a turn (the resolver degrades internally);
//! retrieval failure degrades the turn to a context-free answer instead of
//! aborting it; generation and shaping failures are terminal and typed.
//! Resolution and retrieval have no data dependency and run concurrently.

use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::prompt::PromptResolver;
use crate::retrieval::ContextRetriever;
use crate::schema::{
    parse_structured, response_format, ArticleDigest, NewsIntent, StructuredOutput,
};
use crate::trace::{SpanGuard, TraceRecorder};
use crate::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// News answer grounded in retrieved context
pub const NEWS_PROMPT_KEY: &str = "chat_response";
/// Plain conversational answer
pub const GENERAL_PROMPT_KEY: &str = "general_response";
/// Intent classification for flow routing
pub const INTENT_PROMPT_KEY: &str = "news_intent";
/// Batch article summarization during ingestion
pub const DIGEST_PROMPT_KEY: &str = "news_summary";
/// Repair instruction appended after a malformed structured reply
pub const REPAIR_PROMPT_KEY: &str = "llm_retry";

/// Prompts the pipeline cannot run without; checked at startup
pub fn required_prompts() -> &'static [&'static str] {
    &[
        NEWS_PROMPT_KEY,
        GENERAL_PROMPT_KEY,
        INTENT_PROMPT_KEY,
        DIGEST_PROMPT_KEY,
        REPAIR_PROMPT_KEY,
    ]
}

/// Which pipeline handles a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// Classify the message first, then route
    Auto,
    /// Answer without retrieval
    General,
    /// Answer grounded in retrieved passages
    News,
}

/// Tunables for a single orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Passages requested per news turn
    pub retrieval_k: usize,
    /// Total model calls allowed per structured output, including repairs
    pub max_model_attempts: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retrieval_k: 4,
            max_model_attempts: 2,
        }
    }
}

/// One completed conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub flow: Flow,
    /// True when retrieval failed and the answer was produced without context
    pub context_free: bool,
}

/// Drives a conversation turn end to end
pub struct ChatOrchestrator {
    resolver: Arc<PromptResolver>,
    retriever: Arc<ContextRetriever>,
    model: Arc<dyn ChatModel>,
    recorder: TraceRecorder,
    options: OrchestratorOptions,
}

impl ChatOrchestrator {
    pub fn new(
        resolver: Arc<PromptResolver>,
        retriever: Arc<ContextRetriever>,
        model: Arc<dyn ChatModel>,
        recorder: TraceRecorder,
    ) -> Self {
        Self {
            resolver,
            retriever,
            model,
            recorder,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle one conversation turn.
    /// Contract:
    /// - message must be non-empty
    /// - Auto flow classifies first; classification failure falls back to
    ///   General rather than failing the turn
    /// - retrieval failure on the News path degrades to a context-free
    ///   answer, tagged on the response
    /// - generation and shaping errors are returned typed
    pub async fn handle(
        &self,
        history: Vec<ChatMessage>,
        message: &str,
        flow: Flow,
    ) -> Result<ChatResponse> {
        if message.trim().is_empty() {
            return Err(RelayError::InvalidRequest("Message must be non-empty".into()));
        }

        let mut root = self
            .recorder
            .start_span("conversation", json!({"message": message}));

        let resolved_flow = match flow {
            Flow::Auto => self.detect_flow(&root, message).await,
            other => other,
        };
        root.annotate("flow", json!(resolved_flow));

        let (rendered, context_free) = match resolved_flow {
            Flow::News => self.build_news_prompt(&root, message).await?,
            _ => {
                let resolution = self.resolver.resolve(GENERAL_PROMPT_KEY).await?;
                (resolution.template.render(&slots(message, "")), false)
            }
        };
        root.annotate("context_free", json!(context_free));

        let mut messages = history;
        messages.push(ChatMessage::user(rendered));

        let result = self
            .invoke_model(&root, ChatRequest::from_messages(messages))
            .await;
        match result {
            Ok(completion) => {
                root.end_ok(json!({"text": completion.text}));
                Ok(ChatResponse {
                    text: completion.text,
                    flow: resolved_flow,
                    context_free,
                })
            }
            Err(e) => {
                root.end_err(&e.to_string());
                Err(e)
            }
        }
    }

    /// Summarize a batch of raw article content into a structured digest.
    /// Used by the ingestion path before storage.
    pub async fn summarize_articles(&self, articles: &str) -> Result<ArticleDigest> {
        let root = self
            .recorder
            .start_span("ingestion", json!({"bytes": articles.len()}));

        let resolution = self.resolver.resolve(DIGEST_PROMPT_KEY).await?;
        let mut slots = HashMap::new();
        slots.insert("articles", articles.to_string());
        let rendered = resolution.template.render(&slots);

        let result = self
            .invoke_structured::<ArticleDigest>(&root, vec![ChatMessage::user(rendered)])
            .await;
        match result {
            Ok(digest) => {
                root.end_ok(json!({"items": digest.items.len()}));
                Ok(digest)
            }
            Err(e) => {
                root.end_err(&e.to_string());
                Err(e)
            }
        }
    }

    /// Classify the message. Any failure falls back to the general flow so
    /// a broken classifier never takes down plain conversation.
    async fn detect_flow(&self, parent: &SpanGuard, message: &str) -> Flow {
        let resolution = match self.resolver.resolve(INTENT_PROMPT_KEY).await {
            Ok(r) => r,
            Err(e) => {
                warn!(target = "orchestrator", error = %e, "Intent prompt unavailable; using general flow");
                return Flow::General;
            }
        };
        let rendered = resolution.template.render(&slots(message, ""));

        match self
            .invoke_structured::<NewsIntent>(parent, vec![ChatMessage::user(rendered)])
            .await
        {
            Ok(intent) if intent.is_news => Flow::News,
            Ok(_) => Flow::General,
            Err(e) => {
                warn!(target = "orchestrator", error = %e, "Intent classification failed; using general flow");
                Flow::General
            }
        }
    }

    /// Resolve the news prompt and retrieve context concurrently; degrade to
    /// a context-free render when retrieval fails.
    async fn build_news_prompt(
        &self,
        parent: &SpanGuard,
        message: &str,
    ) -> Result<(String, bool)> {
        let mut span = parent.child("retrieval", json!({"k": self.options.retrieval_k}));

        let (resolution, retrieved) = tokio::join!(
            self.resolver.resolve(NEWS_PROMPT_KEY),
            self.retriever.retrieve(message, self.options.retrieval_k),
        );
        let resolution = resolution?;

        let (context, context_free) = match retrieved {
            Ok(passages) => {
                span.annotate("passages", json!(passages.len()));
                span.end_ok(json!({"count": passages.len()}));
                let joined = passages
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (joined, false)
            }
            Err(e) => {
                warn!(target = "orchestrator", error = %e, "Retrieval failed; answering without context");
                span.end_err(&e.to_string());
                (String::new(), true)
            }
        };

        Ok((resolution.template.render(&slots(message, &context)), context_free))
    }

    /// One traced model call
    async fn invoke_model(
        &self,
        parent: &SpanGuard,
        request: ChatRequest,
    ) -> Result<crate::llm::ChatCompletion> {
        let span = parent.child(
            "generation",
            json!({
                "messages": request.messages.len(),
                "structured": request.response_format.is_some(),
            }),
        );
        match self.model.complete(request).await {
            Ok(completion) => {
                span.end_ok(json!({"text": completion.text}));
                Ok(completion)
            }
            Err(e) => {
                span.end_err(&e.to_string());
                Err(e)
            }
        }
    }

    /// Invoke the model for a schema-validated output with a bounded repair
    /// loop. Each repair attempt appends the previous reply and parser error
    /// so the model can correct itself; the loop never exceeds
    /// `max_model_attempts` total calls.
    async fn invoke_structured<T: StructuredOutput>(
        &self,
        parent: &SpanGuard,
        mut messages: Vec<ChatMessage>,
    ) -> Result<T> {
        let attempts = self.options.max_model_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            let request = ChatRequest::from_messages(messages.clone())
                .with_response_format(response_format::<T>());
            let completion = self.invoke_model(parent, request).await?;

            match parse_structured::<T>(&completion.text) {
                Ok(value) => {
                    if attempt > 0 {
                        info!(target = "orchestrator", attempt, "Structured output repaired");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    debug!(target = "orchestrator", attempt, error = %e, "Structured output malformed");
                    if attempt + 1 < attempts {
                        messages.push(self.repair_message(&completion.text, &e).await);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            RelayError::SchemaViolation(format!("{}: no attempts made", T::name()))
        }))
    }

    async fn repair_message(&self, reply: &str, error: &RelayError) -> ChatMessage {
        let template = match self.resolver.resolve(REPAIR_PROMPT_KEY).await {
            Ok(r) => r.template,
            Err(_) => crate::prompt::PromptTemplate::new(
                "Your previous reply was not valid JSON for the required schema.\n\
                 Reply: {response}\nError: {error}\nReturn only corrected JSON.",
            ),
        };
        let mut slots = HashMap::new();
        slots.insert("response", reply.to_string());
        slots.insert("error", error.to_string());
        ChatMessage::system(template.render(&slots))
    }
}

/// The same user text fills both `{query}` and `{question}` slots so
/// templates written against either name render correctly.
fn slots(message: &str, context: &str) -> HashMap<&'static str, String> {
    let mut slots = HashMap::new();
    slots.insert("query", message.to_string());
    slots.insert("question", message.to_string());
    slots.insert("context", context.to_string());
    slots
}
