use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::domain::knowledge::KnowledgeChunk;
use crate::knowledge::embedding::{cosine_similarity, Embedder, EmbeddingError};
use crate::knowledge::index::KnowledgeIndex;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_relevance: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 3, min_relevance: 0.15 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, settings: RetrievalSettings) -> Self {
        Self { embedder, settings }
    }

    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    /// At most `k` chunks scoring at least the minimum relevance, best first.
    /// Equal scores put the most recently indexed chunk first, then order by
    /// chunk id, so the same query over the same snapshot always yields the
    /// same list. An empty list means nothing relevant was found.
    pub async fn retrieve(
        &self,
        index: &KnowledgeIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        if index.is_empty() || k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if index.embedding_model != self.embedder.model_id() {
            debug!(
                event_name = "knowledge.retrieval_model_mismatch",
                index_model = %index.embedding_model,
                query_model = %self.embedder.model_id(),
                "index was built with a different embedder"
            );
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(&[query.to_owned()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no vector for query".to_owned()))?;

        let mut scored: Vec<(&KnowledgeChunk, f32)> = index
            .chunks
            .iter()
            .map(|chunk| (chunk, cosine_similarity(&query_vector, &chunk.embedding)))
            .filter(|(_, score)| score.is_finite() && *score >= self.settings.min_relevance)
            .collect();

        scored.sort_by(|(left, left_score), (right, right_score)| {
            right_score
                .partial_cmp(left_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| right.metadata.indexed_at.cmp(&left.metadata.indexed_at))
                .then_with(|| left.id.cmp(&right.id))
        });
        scored.truncate(k);

        debug!(
            event_name = "knowledge.retrieved",
            index_version = index.version,
            hits = scored.len(),
            top_score = scored.first().map(|(_, score)| *score),
            "retrieval finished"
        );
        Ok(scored
            .into_iter()
            .map(|(chunk, score)| ScoredChunk { chunk: chunk.clone(), score })
            .collect())
    }

    pub async fn retrieve_default(
        &self,
        index: &KnowledgeIndex,
        query: &str,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        self.retrieve(index, query, self.settings.top_k).await
    }
}
