//! LLM module: message types, the `ChatModel` seam, and the HTTP client
//!
//! This module provides:
//! - `ChatMessage`/`Role` for conversation turns
//! - `ChatModel` trait so the orchestrator can be tested against fakes
//! - `OpenAiChatClient` for talking to OpenAI-compatible backends

mod client;

pub use client::OpenAiChatClient;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Roles for messages in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of conversation, owned by the caller's session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single model invocation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Optional `response_format` payload for strict structured output
    pub response_format: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            response_format: None,
        }
    }

    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// Minimal completion containing the assistant text
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatCompletion {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<serde_json::Value>,
}

/// The model-invocation seam. One implementation per provider; fakes in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion>;
}
