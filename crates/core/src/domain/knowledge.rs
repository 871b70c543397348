use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    /// Embeds the index generation so a superseded id can never come back.
    pub fn new(document: &DocumentId, generation: u64, ordinal: u32) -> Self {
        Self(format!("{}@g{generation}#{ordinal}", document.0))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw policy or FAQ document as handed to the indexer. The body stays raw
/// bytes because decoding is part of indexing and may fail per document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub title: String,
    pub version: String,
    pub body: Vec<u8>,
}

impl SourceDocument {
    pub fn from_text(
        id: impl Into<String>,
        title: impl Into<String>,
        version: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: DocumentId(id.into()),
            title: title.into(),
            version: version.into(),
            body: body.into().into_bytes(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub section_title: Option<String>,
    pub document_version: String,
    pub indexed_at: DateTime<Utc>,
    pub ordinal: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}
