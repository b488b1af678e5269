//! Heterogeneous semantic retrieval.
//!
//! A query is embedded once, fanned out to the vector store for every
//! requested entity type concurrently, and the per-type hits are merged into a
//! single list ranked by similarity. Scores are passed through unchanged.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use thiserror::Error;
use tracing::debug;

use crate::domain::owner::OwnerId;
use crate::domain::retrieval::{EntityType, RetrievedItem};

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;
pub const BODY_CHAR_BUDGET: usize = 500;
pub const EMPTY_CONTEXT: &str = "No relevant information found.";
const CONTEXT_HEADER: &str = "Here is relevant information from your data:\n\n";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct EmbeddingError(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct VectorStoreError(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("query embedding was empty")]
    EmptyEmbedding,
    #[error("vector store lookup for `{entity_type}` failed: {source}")]
    VectorStore { entity_type: &'static str, source: VectorStoreError },
}

/// Text to fixed-length vector. Returns an empty vector for empty input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Ordered-scan nearest neighbour lookup over one owner's records of a single
/// entity type. Hits are returned most similar first.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn nearest_neighbors(
        &self,
        owner_id: &OwnerId,
        entity_type: EntityType,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, VectorStoreError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_similarity: f32,
    pub entity_types: Vec<EntityType>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            entity_types: EntityType::ALL.to_vec(),
        }
    }
}

impl SearchOptions {
    pub fn with_limit(top_k: usize, min_similarity: f32) -> Self {
        Self { top_k, min_similarity, ..Self::default() }
    }
}

#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub async fn search(
        &self,
        owner_id: &OwnerId,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        let vector = self.embedder.embed(query).await?;
        if vector.is_empty() {
            return Err(RetrievalError::EmptyEmbedding);
        }

        let lookups = options.entity_types.iter().map(|entity_type| {
            let vector = &vector;
            async move {
                self.store
                    .nearest_neighbors(owner_id, *entity_type, vector, options.top_k)
                    .await
                    .map_err(|source| RetrievalError::VectorStore {
                        entity_type: entity_type.as_str(),
                        source,
                    })
            }
        });
        let per_type = try_join_all(lookups).await?;

        let items = rank(per_type.into_iter().flatten().collect(), options);
        debug!(
            event_name = "retrieval.search.completed",
            owner_id = %owner_id,
            result_count = items.len(),
            "semantic search completed"
        );
        Ok(items)
    }
}

/// Threshold, stable descending sort and truncation. Ties keep the
/// concatenation order of the per-type results.
pub fn rank(items: Vec<RetrievedItem>, options: &SearchOptions) -> Vec<RetrievedItem> {
    let mut kept: Vec<RetrievedItem> =
        items.into_iter().filter(|item| item.similarity >= options.min_similarity).collect();
    kept.sort_by(|left, right| {
        right.similarity.partial_cmp(&left.similarity).unwrap_or(Ordering::Equal)
    });
    kept.truncate(options.top_k);
    kept
}

/// Renders retrieved items as a grounding block for a model prompt.
pub fn format_context(items: &[RetrievedItem]) -> String {
    if items.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    let mut context = String::from(CONTEXT_HEADER);
    for (index, item) in items.iter().enumerate() {
        context.push_str(&format!("[{}] {}\n", index + 1, item.snippet.trim_end()));
        if !item.body.trim().is_empty() {
            let body = truncate_chars(&item.body, BODY_CHAR_BUDGET);
            match item.entity_type {
                EntityType::Email => context.push_str(&format!("Content: {body}\n")),
                EntityType::Contact | EntityType::Note => context.push_str(&format!("{body}\n")),
            }
        }
        context.push_str(&format!("(Relevance: {:.1}%)\n\n", item.similarity * 100.0));
    }
    context
}

fn truncate_chars(text: &str, budget: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(budget).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
