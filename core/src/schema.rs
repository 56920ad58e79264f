//! Structured output schemas for model responses.
//!
//! Each type that the orchestrator asks the model to emit implements
//! `StructuredOutput`: a name, a strict JSON schema for the provider's
//! `response_format`, and lenient parsing that tolerates markdown fences
//! around otherwise valid JSON.

use crate::{RelayError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Classification result for routing a user message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsIntent {
    /// Whether the user query is news related
    pub is_news: bool,
}

/// One summarized article
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleSummary {
    /// Article headline or title
    pub title: String,
    /// Factual summary capturing key details and context
    pub summary: String,
    /// Source name, or null if unavailable
    pub source: Option<String>,
}

/// A batch of summarized articles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArticleDigest {
    pub items: Vec<ArticleSummary>,
}

/// A schema-validated model output type
pub trait StructuredOutput: DeserializeOwned {
    /// Schema name surfaced to the provider
    fn name() -> &'static str;

    /// Strict JSON schema for the provider's response_format
    fn json_schema() -> Value;
}

impl StructuredOutput for NewsIntent {
    fn name() -> &'static str {
        "news_intent"
    }

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "is_news": {"type": "boolean"}
            },
            "required": ["is_news"],
            "additionalProperties": false
        })
    }
}

impl StructuredOutput for ArticleSummary {
    fn name() -> &'static str {
        "article_summary"
    }

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "summary": {"type": "string"},
                "source": {"type": ["string", "null"]}
            },
            "required": ["title", "summary", "source"],
            "additionalProperties": false
        })
    }
}

impl StructuredOutput for ArticleDigest {
    fn name() -> &'static str {
        "article_digest"
    }

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": ArticleSummary::json_schema()
                }
            },
            "required": ["items"],
            "additionalProperties": false
        })
    }
}

/// Build the provider `response_format` payload for a structured type
pub fn response_format<T: StructuredOutput>() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": T::name(),
            "strict": true,
            "schema": T::json_schema(),
        }
    })
}

/// Parse model output into a structured type.
///
/// Models occasionally wrap valid JSON in markdown fences; strip those
/// before giving up. Any remaining failure is a SchemaViolation carrying
/// the parser message, distinct from provider errors.
pub fn parse_structured<T: StructuredOutput>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    match serde_json::from_str::<T>(trimmed) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            let stripped = strip_code_fences(trimmed);
            if stripped != trimmed {
                if let Ok(v) = serde_json::from_str::<T>(stripped) {
                    return Ok(v);
                }
            }
            Err(RelayError::SchemaViolation(format!(
                "{}: {}",
                T::name(),
                first_err
            )))
        }
    }
}

fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(t) = t.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the fence line
    let t = match t.find('\n') {
        Some(i) => &t[i + 1..],
        None => t,
    };
    t.strip_suffix("```").map(|s| s.trim()).unwrap_or(text)
}
