pub mod audit;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod errors;
pub mod knowledge;
pub mod normalizer;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use dialogue::{DialogueEngine, DialogueState, InputKind, Session, SessionId};
pub use domain::complaint::{
    ComplaintAuditEntry, ComplaintCategory, ComplaintDraft, ComplaintFilter, ComplaintId,
    ComplaintRecord, ComplaintStatus,
};
pub use domain::knowledge::{ChunkId, DocumentId, KnowledgeChunk, SourceDocument};
pub use domain::order::{Order, OrderId, OrderStatus, PhoneNumber};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use knowledge::{KnowledgeBase, KnowledgeIndex, KnowledgeIndexer, Retriever, ScoredChunk};
pub use normalizer::{InputNormalizer, NormalizedValue, Severity, ValidationError};
