//! Context retrieval over a vector similarity index.
//!
//! This module provides:
//! - `Embedder` and `VectorIndex` traits so both sides of a similarity
//!   search can be faked in tests
//! - HTTP implementations for an OpenAI-compatible embedder and Qdrant
//! - `ContextRetriever` composing the two into retrieve/store operations
//!
//! A failed retrieval is a typed error, never a silent empty set: the
//! orchestrator must be able to tell "nothing relevant" apart from "the
//! index is down" to degrade gracefully instead of aborting.

mod embedding;
mod index;

pub use embedding::OpenAiEmbedder;
pub use index::QdrantIndex;

use crate::{RelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Upsert batch size for ingestion
pub const BATCH_SIZE: usize = 10;

/// One supporting passage returned by a similarity search.
/// Immutable; lifetime is a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub score: f32,
    pub source_id: String,
}

/// Embeds text into the index's vector space
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A point to be written into the vector index
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub text: String,
    pub payload: Value,
}

/// The vector index seam: similarity search plus batch upsert
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>>;
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()>;
}

/// Composes embedding and similarity search into query-level retrieval
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Retrieve up to k passages for a query, most relevant first.
    /// Contract:
    /// - query must be non-empty; k = 0 returns empty without a network call
    /// - results are ordered by non-increasing score; ties keep the index's
    ///   return order (stable sort), so a fixed snapshot is deterministic
    /// - any embedding or index failure is a Retrieval error
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        if query.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "Retrieval query must be non-empty".into(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        debug!(target = "retrieval", k, query = %truncate(query, 50), "Retrieving passages");
        let vector = self.embedder.embed(query).await?;
        let mut passages = self.index.search(&vector, k).await?;

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(k);
        Ok(passages)
    }

    /// Embed and upsert a set of texts with payloads, in batches.
    /// Returns the number of stored points.
    pub async fn store(&self, entries: Vec<(String, Value)>) -> Result<usize> {
        let mut stored = 0usize;
        for chunk in entries.chunks(BATCH_SIZE) {
            let mut points = Vec::with_capacity(chunk.len());
            for (text, payload) in chunk {
                let vector = self.embedder.embed(text).await?;
                points.push(IndexPoint {
                    id: next_point_id(),
                    vector,
                    text: text.clone(),
                    payload: payload.clone(),
                });
            }
            let count = points.len();
            self.index.upsert(points).await?;
            stored += count;
        }
        debug!(target = "retrieval", stored, "Stored passages");
        Ok(stored)
    }
}

/// Qdrant point ids must be unsigned integers or UUIDs; derive a unique
/// u64 from the current time plus a process-local counter.
fn next_point_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    (chrono::Utc::now().timestamp_millis() as u64) * 1000 + (counter % 1000)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RelayError::Retrieval("embedding backend down".into()))
        }
    }

    /// Returns a fixed result set regardless of the query vector
    struct FixedIndex(Vec<RetrievedPassage>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(&self, _vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        async fn upsert(&self, _points: Vec<IndexPoint>) -> Result<()> {
            Ok(())
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn search(&self, _vector: &[f32], _k: usize) -> Result<Vec<RetrievedPassage>> {
            Err(RelayError::Retrieval("index unreachable".into()))
        }

        async fn upsert(&self, _points: Vec<IndexPoint>) -> Result<()> {
            Err(RelayError::Retrieval("index unreachable".into()))
        }
    }

    fn passage(id: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            text: format!("passage {}", id),
            score,
            source_id: id.to_string(),
        }
    }

    fn retriever_with(passages: Vec<RetrievedPassage>) -> ContextRetriever {
        ContextRetriever::new(Arc::new(FixedEmbedder), Arc::new(FixedIndex(passages)))
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_score_desc() {
        let retriever = retriever_with(vec![
            passage("a", 0.3),
            passage("b", 0.9),
            passage("c", 0.5),
        ]);

        let got = retriever.retrieve("query", 3).await.unwrap();
        let ids: Vec<_> = got.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_retrieve_respects_k() {
        let retriever = retriever_with(vec![
            passage("a", 0.9),
            passage("b", 0.8),
            passage("c", 0.7),
        ]);

        let got = retriever.retrieve("query", 2).await.unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_k_zero_is_empty() {
        let retriever = retriever_with(vec![passage("a", 0.9)]);
        let got = retriever.retrieve("query", 0).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_ties_keep_index_order() {
        let retriever = retriever_with(vec![
            passage("first", 0.5),
            passage("second", 0.5),
            passage("third", 0.5),
        ]);

        // Repeated calls on a fixed snapshot produce the same sequence
        for _ in 0..3 {
            let got = retriever.retrieve("query", 3).await.unwrap();
            let ids: Vec<_> = got.iter().map(|p| p.source_id.as_str()).collect();
            assert_eq!(ids, ["first", "second", "third"]);
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = retriever_with(vec![]);
        let err = retriever.retrieve("   ", 4).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_index_failure_is_typed() {
        let retriever = ContextRetriever::new(Arc::new(FixedEmbedder), Arc::new(FailingIndex));
        let err = retriever.retrieve("query", 4).await.unwrap_err();
        assert!(matches!(err, RelayError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_embedder_failure_is_typed() {
        let retriever =
            ContextRetriever::new(Arc::new(FailingEmbedder), Arc::new(FixedIndex(vec![])));
        let err = retriever.retrieve("query", 4).await.unwrap_err();
        assert!(matches!(err, RelayError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_store_counts_points() {
        let retriever = retriever_with(vec![]);
        let entries: Vec<(String, Value)> = (0..23)
            .map(|i| (format!("text {}", i), json!({"n": i})))
            .collect();
        let stored = retriever.store(entries).await.unwrap();
        assert_eq!(stored, 23);
    }

    #[test]
    fn test_point_ids_unique() {
        let a = next_point_id();
        let b = next_point_id();
        assert_ne!(a, b);
    }
}
