use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::info;

use trustline_core::domain::complaint::{
    ComplaintAuditEntry, ComplaintCategory, ComplaintDraft, ComplaintFilter, ComplaintId,
    ComplaintRecord, ComplaintStatus,
};
use trustline_core::domain::order::OrderId;

use super::{format_timestamp, parse_timestamp, ComplaintRepository, RepositoryError};
use crate::DbPool;

const RECORD_COLUMNS: &str = "id, category, description, order_id, evidence_json, session_id, \
                              status, resolution_notes, created_at, updated_at";

pub struct SqlComplaintRepository {
    pool: DbPool,
}

impl SqlComplaintRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn row_to_record(row: &SqliteRow) -> Result<ComplaintRecord, RepositoryError> {
    let category: String = decode(row.try_get("category"))?;
    let status: String = decode(row.try_get("status"))?;
    let evidence_json: String = decode(row.try_get("evidence_json"))?;
    let created_at: String = decode(row.try_get("created_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;
    let order_id: Option<String> = decode(row.try_get("order_id"))?;

    Ok(ComplaintRecord {
        id: ComplaintId(decode(row.try_get("id"))?),
        category: ComplaintCategory::parse(&category)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown category `{category}`")))?,
        description: decode(row.try_get("description"))?,
        order_id: order_id.map(OrderId),
        evidence: serde_json::from_str(&evidence_json)
            .map_err(|error| RepositoryError::Decode(format!("evidence_json: {error}")))?,
        session_id: decode(row.try_get("session_id"))?,
        status: parse_status(&status)?,
        resolution_notes: decode(row.try_get("resolution_notes"))?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<ComplaintAuditEntry, RepositoryError> {
    let sequence: i64 = decode(row.try_get("sequence"))?;
    let from_status: Option<String> = decode(row.try_get("from_status"))?;
    let to_status: String = decode(row.try_get("to_status"))?;
    let recorded_at: String = decode(row.try_get("recorded_at"))?;

    Ok(ComplaintAuditEntry {
        complaint_id: ComplaintId(decode(row.try_get("complaint_id"))?),
        sequence: u32::try_from(sequence)
            .map_err(|_| RepositoryError::Decode(format!("sequence out of range: {sequence}")))?,
        from_status: from_status.as_deref().map(parse_status).transpose()?,
        to_status: parse_status(&to_status)?,
        notes: decode(row.try_get("notes"))?,
        actor: decode(row.try_get("actor"))?,
        recorded_at: parse_timestamp(&recorded_at, "recorded_at")?,
    })
}

fn parse_status(value: &str) -> Result<ComplaintStatus, RepositoryError> {
    ComplaintStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown complaint status `{value}`")))
}

async fn insert_entry<'e, E>(executor: E, entry: &ComplaintAuditEntry) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO complaint_status_history
             (complaint_id, sequence, from_status, to_status, notes, actor, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.complaint_id.0)
    .bind(i64::from(entry.sequence))
    .bind(entry.from_status.map(ComplaintStatus::as_str))
    .bind(entry.to_status.as_str())
    .bind(&entry.notes)
    .bind(&entry.actor)
    .bind(format_timestamp(entry.recorded_at))
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl ComplaintRepository for SqlComplaintRepository {
    async fn create(
        &self,
        draft: ComplaintDraft,
        actor: &str,
    ) -> Result<ComplaintRecord, RepositoryError> {
        let now = Utc::now();
        let (record, entry) = ComplaintRecord::open(ComplaintId::generate(now), draft, actor, now);
        let evidence_json = serde_json::to_string(&record.evidence)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO complaint
                 (id, category, description, order_id, evidence_json, session_id,
                  status, resolution_notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(record.category.as_str())
        .bind(&record.description)
        .bind(record.order_id.as_ref().map(|id| id.0.as_str()))
        .bind(&evidence_json)
        .bind(&record.session_id)
        .bind(record.status.as_str())
        .bind(&record.resolution_notes)
        .bind(format_timestamp(record.created_at))
        .bind(format_timestamp(record.updated_at))
        .execute(&mut *tx)
        .await?;
        insert_entry(&mut *tx, &entry).await?;
        tx.commit().await?;

        info!(
            event_name = "complaint.created",
            complaint_id = %record.id,
            category = record.category.as_str(),
            actor,
            "complaint record created"
        );
        Ok(record)
    }

    async fn update_status(
        &self,
        id: &ComplaintId,
        status: ComplaintStatus,
        notes: Option<String>,
        actor: &str,
    ) -> Result<ComplaintAuditEntry, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM complaint WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(RepositoryError::NotFound { entity: "complaint", id: id.0.clone() });
        };
        let mut record = row_to_record(&row)?;

        let last_sequence: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) AS last FROM complaint_status_history
             WHERE complaint_id = ?",
        )
        .bind(&id.0)
        .fetch_one(&mut *tx)
        .await?
        .try_get("last")?;
        let sequence = u32::try_from(last_sequence + 1)
            .map_err(|_| RepositoryError::Decode("audit sequence overflow".to_owned()))?;

        let entry = record.apply_status(status, notes, actor, sequence, Utc::now())?;

        sqlx::query(
            "UPDATE complaint SET status = ?, resolution_notes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(record.status.as_str())
        .bind(&record.resolution_notes)
        .bind(format_timestamp(record.updated_at))
        .bind(&record.id.0)
        .execute(&mut *tx)
        .await?;
        insert_entry(&mut *tx, &entry).await?;
        tx.commit().await?;

        info!(
            event_name = "complaint.status_changed",
            complaint_id = %id,
            from = entry.from_status.map(ComplaintStatus::as_str).unwrap_or(""),
            to = entry.to_status.as_str(),
            sequence = entry.sequence,
            actor,
            "complaint status updated"
        );
        Ok(entry)
    }

    async fn find_by_id(
        &self,
        id: &ComplaintId,
    ) -> Result<Option<ComplaintRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM complaint WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self, filter: &ComplaintFilter) -> Result<Vec<ComplaintRecord>, RepositoryError> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {RECORD_COLUMNS} FROM complaint WHERE 1 = 1"));
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category) = filter.category {
            query.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(from) = filter.created_from {
            query.push(" AND created_at >= ").push_bind(format_timestamp(from));
        }
        if let Some(to) = filter.created_to {
            query.push(" AND created_at < ").push_bind(format_timestamp(to));
        }
        if let Some(order_id) = &filter.order_id {
            query.push(" AND order_id = ").push_bind(order_id.0.clone());
        }
        query.push(" ORDER BY created_at DESC, id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn audit_trail(
        &self,
        id: &ComplaintId,
    ) -> Result<Vec<ComplaintAuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT complaint_id, sequence, from_status, to_status, notes, actor, recorded_at
             FROM complaint_status_history
             WHERE complaint_id = ?
             ORDER BY sequence ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use sqlx::Row;

    use trustline_core::domain::complaint::{
        ComplaintCategory, ComplaintDraft, ComplaintFilter, ComplaintId, ComplaintStatus,
    };
    use trustline_core::domain::order::OrderId;
    use trustline_core::errors::DomainError;

    use super::SqlComplaintRepository;
    use crate::repositories::{ComplaintRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, SqlComplaintRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        (pool.clone(), SqlComplaintRepository::new(pool))
    }

    fn draft(category: ComplaintCategory, order: &str) -> ComplaintDraft {
        ComplaintDraft {
            category,
            description: "Box arrived crushed, the mug inside is broken.".to_owned(),
            order_id: Some(OrderId(order.to_owned())),
            evidence: vec!["photo.txt: crushed corner".to_owned()],
            session_id: Some("sess-test".to_owned()),
        }
    }

    #[tokio::test]
    async fn created_complaint_is_open_with_one_audit_entry() {
        let (_, repo) = setup().await;
        let record = repo.create(draft(ComplaintCategory::DamagedItem, "ORD-001"), "dialogue").await.expect("create");

        assert_eq!(record.status, ComplaintStatus::Open);
        assert!(record.id.0.starts_with("CMP-"));

        let stored = repo.find_by_id(&record.id).await.expect("find").expect("exists");
        assert_eq!(stored, record);

        let trail = repo.audit_trail(&record.id).await.expect("trail");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].sequence, 1);
        assert_eq!(trail[0].to_status, ComplaintStatus::Open);
        assert_eq!(trail[0].from_status, None);
    }

    #[tokio::test]
    async fn status_updates_append_to_the_trail() {
        let (_, repo) = setup().await;
        let record = repo.create(draft(ComplaintCategory::LateDelivery, "ORD-002"), "dialogue").await.expect("create");

        repo.update_status(&record.id, ComplaintStatus::InReview, None, "admin").await.expect("review");
        let entry = repo
            .update_status(&record.id, ComplaintStatus::Resolved, Some("voucher sent".to_owned()), "admin")
            .await
            .expect("resolve");
        assert_eq!(entry.sequence, 3);

        let trail = repo.audit_trail(&record.id).await.expect("trail");
        let statuses: Vec<_> = trail.iter().map(|entry| entry.to_status).collect();
        assert_eq!(
            statuses,
            vec![ComplaintStatus::Open, ComplaintStatus::InReview, ComplaintStatus::Resolved]
        );
        assert_eq!(trail[2], entry);

        let stored = repo.find_by_id(&record.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ComplaintStatus::Resolved);
        assert_eq!(stored.resolution_notes.as_deref(), Some("voucher sent"));
        assert_eq!(stored.updated_at, entry.recorded_at);
    }

    #[tokio::test]
    async fn invalid_transition_writes_nothing() {
        let (_, repo) = setup().await;
        let record = repo.create(draft(ComplaintCategory::Other, "ORD-003"), "dialogue").await.expect("create");
        repo.update_status(&record.id, ComplaintStatus::Rejected, None, "admin").await.expect("reject");

        let error = repo
            .update_status(&record.id, ComplaintStatus::Resolved, None, "admin")
            .await
            .expect_err("rejected -> resolved is invalid");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::InvalidComplaintTransition { .. })
        ));
        assert_eq!(repo.audit_trail(&record.id).await.expect("trail").len(), 2);
    }

    #[tokio::test]
    async fn unknown_complaint_is_not_found() {
        let (_, repo) = setup().await;
        let error = repo
            .update_status(
                &ComplaintId("CMP-20260101-000000-000000".to_owned()),
                ComplaintStatus::Resolved,
                None,
                "admin",
            )
            .await
            .expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { entity: "complaint", .. }));
    }

    #[tokio::test]
    async fn history_rows_cannot_be_rewritten() {
        let (pool, repo) = setup().await;
        let record = repo.create(draft(ComplaintCategory::Other, "ORD-004"), "dialogue").await.expect("create");

        let update = sqlx::query("UPDATE complaint_status_history SET notes = 'edited'")
            .execute(&pool)
            .await;
        assert!(update.is_err());
        let delete = sqlx::query("DELETE FROM complaint WHERE id = ?").bind(&record.id.0).execute(&pool).await;
        assert!(delete.is_err());

        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM complaint_status_history")
            .fetch_one(&pool)
            .await
            .expect("count")
            .get("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn list_applies_every_filter_field() {
        let (_, repo) = setup().await;
        let damaged = repo.create(draft(ComplaintCategory::DamagedItem, "ORD-001"), "dialogue").await.expect("create");
        let late = repo.create(draft(ComplaintCategory::LateDelivery, "ORD-002"), "dialogue").await.expect("create");
        repo.update_status(&late.id, ComplaintStatus::InReview, None, "admin").await.expect("review");

        let all = repo.list(&ComplaintFilter::default()).await.expect("list");
        assert_eq!(all.len(), 2);

        let open = repo
            .list(&ComplaintFilter { status: Some(ComplaintStatus::Open), ..Default::default() })
            .await
            .expect("list");
        assert_eq!(open.iter().map(|record| &record.id).collect::<Vec<_>>(), vec![&damaged.id]);

        let by_category = repo
            .list(&ComplaintFilter { category: Some(ComplaintCategory::LateDelivery), ..Default::default() })
            .await
            .expect("list");
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].id, late.id);

        let by_order = repo
            .list(&ComplaintFilter { order_id: Some(OrderId("ORD-001".to_owned())), ..Default::default() })
            .await
            .expect("list");
        assert_eq!(by_order.len(), 1);

        let now = Utc::now();
        let window = ComplaintFilter {
            created_from: Some(now - Duration::hours(1)),
            created_to: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert_eq!(repo.list(&window).await.expect("list").len(), 2);
        let future = ComplaintFilter { created_from: Some(now + Duration::hours(1)), ..Default::default() };
        assert!(repo.list(&future).await.expect("list").is_empty());
    }
}
