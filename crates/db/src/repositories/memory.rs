use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tokio::sync::RwLock;

use trustline_core::domain::complaint::{
    ComplaintAuditEntry, ComplaintDraft, ComplaintFilter, ComplaintId, ComplaintRecord,
    ComplaintStatus,
};
use trustline_core::domain::order::{Order, OrderId, PhoneNumber};
use trustline_core::knowledge::KnowledgeIndex;

use super::{ComplaintRepository, KnowledgeRepository, OrderRepository, RepositoryError};

#[derive(Default)]
struct ComplaintState {
    records: HashMap<String, ComplaintRecord>,
    trails: HashMap<String, Vec<ComplaintAuditEntry>>,
}

/// Records and their trails sit behind one lock so a status change and its
/// audit entry land together.
#[derive(Default)]
pub struct InMemoryComplaintRepository {
    state: RwLock<ComplaintState>,
}

#[async_trait::async_trait]
impl ComplaintRepository for InMemoryComplaintRepository {
    async fn create(
        &self,
        draft: ComplaintDraft,
        actor: &str,
    ) -> Result<ComplaintRecord, RepositoryError> {
        let now = Utc::now();
        let (record, entry) = ComplaintRecord::open(ComplaintId::generate(now), draft, actor, now);
        let mut state = self.state.write().await;
        state.trails.insert(record.id.0.clone(), vec![entry]);
        state.records.insert(record.id.0.clone(), record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        id: &ComplaintId,
        status: ComplaintStatus,
        notes: Option<String>,
        actor: &str,
    ) -> Result<ComplaintAuditEntry, RepositoryError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let sequence = state.trails.get(&id.0).map_or(0, Vec::len) as u32 + 1;
        let record = state
            .records
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound { entity: "complaint", id: id.0.clone() })?;
        let entry = record.apply_status(status, notes, actor, sequence, Utc::now())?;
        state.trails.entry(id.0.clone()).or_default().push(entry.clone());
        Ok(entry)
    }

    async fn find_by_id(
        &self,
        id: &ComplaintId,
    ) -> Result<Option<ComplaintRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.records.get(&id.0).cloned())
    }

    async fn list(&self, filter: &ComplaintFilter) -> Result<Vec<ComplaintRecord>, RepositoryError> {
        let state = self.state.read().await;
        let mut records: Vec<ComplaintRecord> =
            state.records.values().filter(|record| filter.matches(record)).cloned().collect();
        records.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(records)
    }

    async fn audit_trail(
        &self,
        id: &ComplaintId,
    ) -> Result<Vec<ComplaintAuditEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.trails.get(&id.0).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<BTreeMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let orders = orders.into_iter().map(|order| (order.id.0.clone(), order)).collect();
        Self { orders: RwLock::new(orders) }
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn find_by_phone(&self, phone: &PhoneNumber) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.values().filter(|order| order.belongs_to(phone)).cloned().collect())
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.0.clone(), order);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeRepository {
    snapshots: RwLock<BTreeMap<u64, KnowledgeIndex>>,
}

#[async_trait::async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn save_snapshot(&self, index: &KnowledgeIndex) -> Result<(), RepositoryError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(index.version, index.clone());
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<KnowledgeIndex>, RepositoryError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.values().next_back().cloned())
    }

    async fn load_version(&self, version: u64) -> Result<Option<KnowledgeIndex>, RepositoryError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&version).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use trustline_core::domain::complaint::{
        ComplaintCategory, ComplaintDraft, ComplaintFilter, ComplaintId, ComplaintStatus,
    };
    use trustline_core::domain::order::{Order, OrderId, OrderStatus, PhoneNumber};
    use trustline_core::knowledge::KnowledgeIndex;

    use super::{InMemoryComplaintRepository, InMemoryKnowledgeRepository, InMemoryOrderRepository};
    use crate::repositories::{
        ComplaintRepository, KnowledgeRepository, OrderRepository, RepositoryError,
    };

    fn draft() -> ComplaintDraft {
        ComplaintDraft {
            category: ComplaintCategory::WrongItem,
            description: "Received a blue kettle instead of the red one.".to_owned(),
            order_id: Some(OrderId("ORD-004".to_owned())),
            evidence: Vec::new(),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn in_memory_complaints_keep_an_append_only_trail() {
        let repo = InMemoryComplaintRepository::default();
        let record = repo.create(draft(), "dialogue").await.expect("create");

        repo.update_status(&record.id, ComplaintStatus::InReview, Some("checking".into()), "admin")
            .await
            .expect("review");
        let sequence = repo
            .update_status(&record.id, ComplaintStatus::InReview, None, "admin")
            .await
            .map(|entry| entry.sequence);
        assert_eq!(sequence.expect("same-status update is allowed"), 3);

        let trail = repo.audit_trail(&record.id).await.expect("trail");
        assert_eq!(trail.iter().map(|entry| entry.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        let stored = repo.find_by_id(&record.id).await.expect("find").expect("exists");
        assert_eq!(stored.resolution_notes.as_deref(), Some("checking"));

        let listed = repo
            .list(&ComplaintFilter { status: Some(ComplaintStatus::InReview), ..Default::default() })
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_complaints_report_missing_ids() {
        let repo = InMemoryComplaintRepository::default();
        let error = repo
            .update_status(
                &ComplaintId("CMP-missing".to_owned()),
                ComplaintStatus::Resolved,
                None,
                "admin",
            )
            .await
            .expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
        assert!(repo.audit_trail(&ComplaintId("CMP-missing".to_owned())).await.expect("trail").is_empty());
    }

    #[tokio::test]
    async fn in_memory_orders_filter_by_phone() {
        let phone = PhoneNumber("+962791234567".to_owned());
        let repo = InMemoryOrderRepository::with_orders([
            Order {
                id: OrderId("ORD-001".to_owned()),
                customer_name: "Lina".to_owned(),
                phone: phone.clone(),
                status: OrderStatus::Delivered,
                updated_at: Utc::now(),
            },
            Order {
                id: OrderId("ORD-002".to_owned()),
                customer_name: "Omar".to_owned(),
                phone: PhoneNumber("+962781112233".to_owned()),
                status: OrderStatus::Preparing,
                updated_at: Utc::now(),
            },
        ]);
        let owned = repo.find_by_phone(&phone).await.expect("by phone");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id.0, "ORD-001");
    }

    #[tokio::test]
    async fn in_memory_knowledge_returns_highest_version() {
        let repo = InMemoryKnowledgeRepository::default();
        let mut index = KnowledgeIndex::empty("hashing-fnv1a-8", 8);
        index.version = 2;
        repo.save_snapshot(&index).await.expect("save");
        index.version = 1;
        repo.save_snapshot(&index).await.expect("save");
        assert_eq!(repo.load_latest().await.expect("load").map(|index| index.version), Some(2));
    }
}
