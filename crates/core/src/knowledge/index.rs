use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::knowledge::{ChunkId, DocumentId, KnowledgeChunk};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: DocumentId,
    pub title: String,
    pub version: String,
    /// `sha256:<hex>` of the raw document body.
    pub content_hash: String,
    pub chunk_ids: Vec<ChunkId>,
}

/// Immutable snapshot of the searchable knowledge base. Refreshing produces a
/// new snapshot with a higher `version`; nothing mutates a published one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeIndex {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimensions: usize,
    pub documents: BTreeMap<DocumentId, IndexedDocument>,
    pub chunks: Vec<KnowledgeChunk>,
}

impl KnowledgeIndex {
    pub fn empty(embedding_model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            version: 0,
            built_at: DateTime::<Utc>::default(),
            embedding_model: embedding_model.into(),
            dimensions,
            documents: BTreeMap::new(),
            chunks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: &ChunkId) -> Option<&KnowledgeChunk> {
        self.chunks.iter().find(|chunk| &chunk.id == id)
    }

    pub fn chunks_for(&self, document: &DocumentId) -> impl Iterator<Item = &KnowledgeChunk> + '_ {
        let document = document.clone();
        self.chunks.iter().filter(move |chunk| chunk.document_id == document)
    }
}
