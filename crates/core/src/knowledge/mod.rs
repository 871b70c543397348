//! Knowledge base: chunking, embedding, indexing and retrieval of policy and
//! FAQ documents.

pub mod base;
pub mod chunker;
pub mod embedding;
pub mod index;
pub mod indexer;
pub mod retriever;
pub mod text;

pub use base::KnowledgeBase;
pub use chunker::{normalize_document_text, split_into_chunks, ChunkingSettings, TextChunk};
pub use embedding::{cosine_similarity, Embedder, EmbeddingError, HashingEmbedder};
pub use index::{IndexedDocument, KnowledgeIndex};
pub use indexer::{content_hash, IndexBuildError, IndexReport, KnowledgeIndexer, SkippedDocument};
pub use retriever::{RetrievalSettings, Retriever, ScoredChunk};
