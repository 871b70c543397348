use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use trustline_core::domain::complaint::{
    ComplaintAuditEntry, ComplaintDraft, ComplaintFilter, ComplaintId, ComplaintRecord,
    ComplaintStatus,
};
use trustline_core::domain::order::{Order, OrderId, PhoneNumber};
use trustline_core::errors::{ApplicationError, DomainError};
use trustline_core::knowledge::KnowledgeIndex;

pub mod complaint;
pub mod knowledge;
pub mod memory;
pub mod order;

pub use complaint::SqlComplaintRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use memory::{
    InMemoryComplaintRepository, InMemoryKnowledgeRepository, InMemoryOrderRepository,
};
pub use order::SqlOrderRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { entity, id } => ApplicationError::NotFound { entity, id },
            RepositoryError::Domain(domain) => ApplicationError::Domain(domain),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Sole writer of complaint state. Records are never deleted and every status
/// change appends one entry to the record's audit trail.
#[async_trait]
pub trait ComplaintRepository: Send + Sync {
    async fn create(
        &self,
        draft: ComplaintDraft,
        actor: &str,
    ) -> Result<ComplaintRecord, RepositoryError>;

    async fn update_status(
        &self,
        id: &ComplaintId,
        status: ComplaintStatus,
        notes: Option<String>,
        actor: &str,
    ) -> Result<ComplaintAuditEntry, RepositoryError>;

    async fn find_by_id(&self, id: &ComplaintId)
        -> Result<Option<ComplaintRecord>, RepositoryError>;

    /// Newest first.
    async fn list(&self, filter: &ComplaintFilter) -> Result<Vec<ComplaintRecord>, RepositoryError>;

    /// Oldest first, by sequence.
    async fn audit_trail(
        &self,
        id: &ComplaintId,
    ) -> Result<Vec<ComplaintAuditEntry>, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Ordered by order id.
    async fn find_by_phone(&self, phone: &PhoneNumber) -> Result<Vec<Order>, RepositoryError>;
    async fn save(&self, order: Order) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<Order>, RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn save_snapshot(&self, index: &KnowledgeIndex) -> Result<(), RepositoryError>;
    async fn load_latest(&self) -> Result<Option<KnowledgeIndex>, RepositoryError>;
    async fn load_version(&self, version: u64) -> Result<Option<KnowledgeIndex>, RepositoryError>;
}

/// Fixed-width UTC timestamps so text columns sort chronologically.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}
