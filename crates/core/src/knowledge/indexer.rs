use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::knowledge::{
    ChunkId, ChunkMetadata, DocumentId, KnowledgeChunk, SourceDocument,
};
use crate::knowledge::chunker::{normalize_document_text, split_into_chunks, ChunkingSettings};
use crate::knowledge::embedding::{Embedder, EmbeddingError};
use crate::knowledge::index::{IndexedDocument, KnowledgeIndex};

/// Per-document failure. Never aborts a batch; the document is skipped and
/// listed in the [`IndexReport`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexBuildError {
    #[error("document `{document}` is not valid UTF-8 text: {reason}")]
    Undecodable { document: DocumentId, reason: String },
    #[error("document `{document}` has no indexable text")]
    Empty { document: DocumentId },
    #[error("document `{document}` appears more than once in the batch")]
    DuplicateDocument { document: DocumentId },
    #[error("document `{document}` could not be embedded: {source}")]
    Embedding { document: DocumentId, source: EmbeddingError },
}

impl IndexBuildError {
    pub fn document(&self) -> &DocumentId {
        match self {
            Self::Undecodable { document, .. }
            | Self::Empty { document }
            | Self::DuplicateDocument { document }
            | Self::Embedding { document, .. } => document,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub document_id: DocumentId,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub version: u64,
    pub indexed: Vec<DocumentId>,
    pub retained: Vec<DocumentId>,
    pub retired: Vec<DocumentId>,
    pub skipped: Vec<SkippedDocument>,
    pub chunks_created: usize,
    pub chunks_retired: usize,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

pub struct KnowledgeIndexer {
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingSettings,
}

impl KnowledgeIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingSettings) -> Self {
        Self { embedder, chunking }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn empty_index(&self) -> KnowledgeIndex {
        KnowledgeIndex::empty(self.embedder.model_id(), self.embedder.dimensions())
    }

    pub async fn build_index(&self, documents: &[SourceDocument]) -> (KnowledgeIndex, IndexReport) {
        self.refresh_index_at(&self.empty_index(), documents, Utc::now()).await
    }

    pub async fn refresh_index(
        &self,
        existing: &KnowledgeIndex,
        changed: &[SourceDocument],
    ) -> (KnowledgeIndex, IndexReport) {
        self.refresh_index_at(existing, changed, Utc::now()).await
    }

    /// Documents whose body hash is unchanged keep their chunks and chunk ids.
    /// Changed documents get a fresh chunk generation and their old chunks are
    /// retired. Documents absent from `changed` are carried over untouched. A
    /// changed document that fails to index keeps its previous chunks.
    pub async fn refresh_index_at(
        &self,
        existing: &KnowledgeIndex,
        changed: &[SourceDocument],
        now: DateTime<Utc>,
    ) -> (KnowledgeIndex, IndexReport) {
        let version = existing.version + 1;
        let mut report = IndexReport { version, ..IndexReport::default() };

        let mut documents = existing.documents.clone();
        let mut chunks_by_document = group_chunks(&existing.chunks);

        if existing.embedding_model != self.embedder.model_id()
            || existing.dimensions != self.embedder.dimensions()
        {
            warn!(
                event_name = "knowledge.embedding_model_changed",
                previous = %existing.embedding_model,
                current = %self.embedder.model_id(),
                "stored vectors are not comparable with the current embedder; dropping them"
            );
            report.chunks_retired += existing.chunks.len();
            report.retired.extend(documents.keys().cloned());
            documents.clear();
            chunks_by_document.clear();
        }

        let mut seen = BTreeSet::new();
        for document in changed {
            if !seen.insert(document.id.clone()) {
                skip(&mut report, IndexBuildError::DuplicateDocument { document: document.id.clone() });
                continue;
            }

            let content_hash = content_hash(&document.body);
            let unchanged = documents
                .get(&document.id)
                .is_some_and(|indexed| indexed.content_hash == content_hash);
            if unchanged {
                report.retained.push(document.id.clone());
                continue;
            }

            match self.index_document(document, version, now).await {
                Ok(new_chunks) => {
                    let retired = chunks_by_document.remove(&document.id).map_or(0, |old| old.len());
                    report.chunks_retired += retired;
                    report.chunks_created += new_chunks.len();
                    report.indexed.push(document.id.clone());
                    documents.insert(
                        document.id.clone(),
                        IndexedDocument {
                            id: document.id.clone(),
                            title: document.title.clone(),
                            version: document.version.clone(),
                            content_hash,
                            chunk_ids: new_chunks.iter().map(|chunk| chunk.id.clone()).collect(),
                        },
                    );
                    chunks_by_document.insert(document.id.clone(), new_chunks);
                }
                Err(error) => skip(&mut report, error),
            }
        }

        let index = KnowledgeIndex {
            version,
            built_at: now,
            embedding_model: self.embedder.model_id().to_owned(),
            dimensions: self.embedder.dimensions(),
            documents,
            chunks: chunks_by_document.into_values().flatten().collect(),
        };

        info!(
            event_name = "knowledge.index_built",
            version,
            documents = index.documents.len(),
            chunks = index.chunks.len(),
            indexed = report.indexed.len(),
            retained = report.retained.len(),
            skipped = report.skipped.len(),
            "knowledge index snapshot built"
        );
        (index, report)
    }

    /// Drops documents that no longer exist in the source. Their chunk ids are
    /// retired with them.
    pub fn retire_documents(
        &self,
        existing: &KnowledgeIndex,
        removed: &[DocumentId],
        now: DateTime<Utc>,
    ) -> (KnowledgeIndex, IndexReport) {
        let mut index = existing.clone();
        index.version = existing.version + 1;
        index.built_at = now;

        let mut report = IndexReport { version: index.version, ..IndexReport::default() };
        for id in removed {
            if index.documents.remove(id).is_some() {
                report.retired.push(id.clone());
            }
        }
        let before = index.chunks.len();
        index.chunks.retain(|chunk| index.documents.contains_key(&chunk.document_id));
        report.chunks_retired = before - index.chunks.len();
        (index, report)
    }

    async fn index_document(
        &self,
        document: &SourceDocument,
        version: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<KnowledgeChunk>, IndexBuildError> {
        let raw = std::str::from_utf8(&document.body).map_err(|error| {
            IndexBuildError::Undecodable { document: document.id.clone(), reason: error.to_string() }
        })?;
        let pieces = split_into_chunks(&normalize_document_text(raw), self.chunking);
        if pieces.is_empty() {
            return Err(IndexBuildError::Empty { document: document.id.clone() });
        }

        let texts: Vec<String> = pieces.iter().map(|piece| piece.text.clone()).collect();
        let embedding_error =
            |source| IndexBuildError::Embedding { document: document.id.clone(), source };
        let vectors = self.embedder.embed(&texts).await.map_err(embedding_error)?;
        if vectors.len() != texts.len() {
            return Err(embedding_error(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, received {}",
                texts.len(),
                vectors.len()
            ))));
        }
        let expected = self.embedder.dimensions();
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(embedding_error(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }));
        }

        Ok(pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (piece, embedding))| {
                let ordinal = ordinal as u32;
                KnowledgeChunk {
                    id: ChunkId::new(&document.id, version, ordinal),
                    document_id: document.id.clone(),
                    text: piece.text,
                    embedding,
                    metadata: ChunkMetadata {
                        section_title: piece.section_title.or_else(|| Some(document.title.clone())),
                        document_version: document.version.clone(),
                        indexed_at: now,
                        ordinal,
                    },
                }
            })
            .collect())
    }
}

pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("sha256:{:x}", hasher.finalize())
}

fn group_chunks(chunks: &[KnowledgeChunk]) -> BTreeMap<DocumentId, Vec<KnowledgeChunk>> {
    let mut grouped: BTreeMap<DocumentId, Vec<KnowledgeChunk>> = BTreeMap::new();
    for chunk in chunks {
        grouped.entry(chunk.document_id.clone()).or_default().push(chunk.clone());
    }
    grouped
}

fn skip(report: &mut IndexReport, error: IndexBuildError) {
    warn!(
        event_name = "knowledge.document_skipped",
        document_id = %error.document(),
        error = %error,
        "document skipped during indexing"
    );
    report
        .skipped
        .push(SkippedDocument { document_id: error.document().clone(), reason: error.to_string() });
}
