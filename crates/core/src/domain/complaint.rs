use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::OrderId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComplaintId(pub String);

impl ComplaintId {
    /// `CMP-YYYYMMDD-HHMMSS-xxxxxx`, the suffix taken from a fresh v4 uuid.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("CMP-{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..6]))
    }
}

impl fmt::Display for ComplaintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplaintCategory {
    DamagedItem,
    MissingItem,
    WrongItem,
    LateDelivery,
    ServiceConduct,
    Escalation,
    Other,
}

impl ComplaintCategory {
    pub const ALL: [ComplaintCategory; 7] = [
        Self::DamagedItem,
        Self::MissingItem,
        Self::WrongItem,
        Self::LateDelivery,
        Self::ServiceConduct,
        Self::Escalation,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DamagedItem => "damaged_item",
            Self::MissingItem => "missing_item",
            Self::WrongItem => "wrong_item",
            Self::LateDelivery => "late_delivery",
            Self::ServiceConduct => "service_conduct",
            Self::Escalation => "escalation",
            Self::Other => "other",
        }
    }

    /// Accepts both the storage form (`damaged_item`) and the type name
    /// (`DamagedItem`).
    pub fn parse(value: &str) -> Option<Self> {
        let key: String = value
            .trim()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .map(|ch| ch.to_ascii_lowercase())
            .collect();
        Self::ALL.into_iter().find(|category| category.as_str().replace('_', "") == key)
    }

    /// Categories that only make sense once the parcel reached the customer.
    pub fn requires_delivery(self) -> bool {
        matches!(self, Self::DamagedItem | Self::MissingItem | Self::WrongItem)
    }
}

impl fmt::Display for ComplaintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplaintStatus {
    Open,
    InReview,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InReview => "in_review",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "open" => Some(Self::Open),
            "in_review" | "inreview" => Some(Self::InReview),
            "resolved" => Some(Self::Resolved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Same-status moves are note updates and always allowed.
    pub fn can_transition_to(self, next: ComplaintStatus) -> bool {
        use ComplaintStatus::{InReview, Open, Rejected, Resolved};
        self == next
            || matches!(
                (self, next),
                (Open, InReview)
                    | (Open, Resolved)
                    | (Open, Rejected)
                    | (InReview, Open)
                    | (InReview, Resolved)
                    | (InReview, Rejected)
                    | (Resolved, InReview)
                    | (Rejected, InReview)
            )
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the dialogue hands to the complaint store when a draft is finalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintDraft {
    pub category: ComplaintCategory,
    pub description: String,
    pub order_id: Option<OrderId>,
    pub evidence: Vec<String>,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintRecord {
    pub id: ComplaintId,
    pub category: ComplaintCategory,
    pub description: String,
    pub order_id: Option<OrderId>,
    pub evidence: Vec<String>,
    pub session_id: Option<String>,
    pub status: ComplaintStatus,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintAuditEntry {
    pub complaint_id: ComplaintId,
    pub sequence: u32,
    pub from_status: Option<ComplaintStatus>,
    pub to_status: ComplaintStatus,
    pub notes: Option<String>,
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
}

impl ComplaintRecord {
    /// Opens a new record and the first audit entry that goes with it.
    pub fn open(
        id: ComplaintId,
        draft: ComplaintDraft,
        actor: &str,
        now: DateTime<Utc>,
    ) -> (Self, ComplaintAuditEntry) {
        let now = stored_precision(now);
        let record = Self {
            id: id.clone(),
            category: draft.category,
            description: draft.description,
            order_id: draft.order_id,
            evidence: draft.evidence,
            session_id: draft.session_id,
            status: ComplaintStatus::Open,
            resolution_notes: None,
            created_at: now,
            updated_at: now,
        };
        let entry = ComplaintAuditEntry {
            complaint_id: id,
            sequence: 1,
            from_status: None,
            to_status: ComplaintStatus::Open,
            notes: None,
            actor: actor.to_owned(),
            recorded_at: now,
        };
        (record, entry)
    }

    /// Applies a status change and returns the audit entry to append.
    /// `sequence` is the number the new entry must carry.
    pub fn apply_status(
        &mut self,
        next: ComplaintStatus,
        notes: Option<String>,
        actor: &str,
        sequence: u32,
        now: DateTime<Utc>,
    ) -> Result<ComplaintAuditEntry, DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidComplaintTransition { from: self.status, to: next });
        }
        let now = stored_precision(now);

        let entry = ComplaintAuditEntry {
            complaint_id: self.id.clone(),
            sequence,
            from_status: Some(self.status),
            to_status: next,
            notes: notes.clone(),
            actor: actor.to_owned(),
            recorded_at: now,
        };
        self.status = next;
        if notes.is_some() {
            self.resolution_notes = notes;
        }
        self.updated_at = now;
        Ok(entry)
    }
}

/// Complaint timestamps are persisted with microsecond precision.
fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub category: Option<ComplaintCategory>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub order_id: Option<OrderId>,
}

impl ComplaintFilter {
    /// `created_from` is inclusive, `created_to` exclusive.
    pub fn matches(&self, record: &ComplaintRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self.category.map_or(true, |category| record.category == category)
            && self.created_from.map_or(true, |from| record.created_at >= from)
            && self.created_to.map_or(true, |to| record.created_at < to)
            && self.order_id.as_ref().map_or(true, |id| record.order_id.as_ref() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Timelike, Utc};

    use super::{
        ComplaintCategory, ComplaintDraft, ComplaintFilter, ComplaintId, ComplaintRecord,
        ComplaintStatus,
    };
    use crate::domain::order::OrderId;
    use crate::errors::DomainError;

    fn draft() -> ComplaintDraft {
        ComplaintDraft {
            category: ComplaintCategory::DamagedItem,
            description: "The box arrived crushed and the mug inside is broken.".to_owned(),
            order_id: Some(OrderId("ORD-001".to_owned())),
            evidence: Vec::new(),
            session_id: Some("sess-1".to_owned()),
        }
    }

    #[test]
    fn generated_ids_follow_the_timestamped_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).single().expect("valid time");
        let id = ComplaintId::generate(now);

        assert!(id.0.starts_with("CMP-20260314-092653-"), "unexpected id {id}");
        assert_eq!(id.0.len(), "CMP-20260314-092653-".len() + 6);
        assert_ne!(id, ComplaintId::generate(now));
    }

    #[test]
    fn category_parses_type_names_and_storage_names() {
        assert_eq!(ComplaintCategory::parse("DamagedItem"), Some(ComplaintCategory::DamagedItem));
        assert_eq!(ComplaintCategory::parse("late_delivery"), Some(ComplaintCategory::LateDelivery));
        assert_eq!(ComplaintCategory::parse("wrong item"), Some(ComplaintCategory::WrongItem));
        assert_eq!(ComplaintCategory::parse("refund"), None);
        assert!(ComplaintCategory::MissingItem.requires_delivery());
        assert!(!ComplaintCategory::LateDelivery.requires_delivery());
    }

    #[test]
    fn opening_a_record_yields_exactly_one_open_entry() {
        let now = Utc::now();
        let (record, entry) =
            ComplaintRecord::open(ComplaintId::generate(now), draft(), "dialogue", now);

        assert_eq!(record.status, ComplaintStatus::Open);
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.from_status, None);
        assert_eq!(entry.to_status, ComplaintStatus::Open);
    }

    #[test]
    fn timestamps_are_kept_at_microsecond_precision() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).single().expect("valid time")
            + Duration::nanoseconds(585_815_123);
        let (mut record, opened) =
            ComplaintRecord::open(ComplaintId::generate(now), draft(), "dialogue", now);

        assert_eq!(record.created_at.nanosecond(), 585_815_000);
        assert_eq!(record.updated_at, record.created_at);
        assert_eq!(opened.recorded_at, record.created_at);

        let later = now + Duration::nanoseconds(999);
        let entry = record
            .apply_status(ComplaintStatus::InReview, None, "admin", 2, later)
            .expect("open -> in_review");
        assert_eq!(entry.recorded_at.nanosecond() % 1_000, 0);
        assert_eq!(record.updated_at, entry.recorded_at);
    }

    #[test]
    fn resolved_complaint_can_only_be_reopened_for_review() {
        let now = Utc::now();
        let (mut record, _) =
            ComplaintRecord::open(ComplaintId::generate(now), draft(), "dialogue", now);

        record
            .apply_status(ComplaintStatus::Resolved, Some("refund issued".into()), "admin", 2, now)
            .expect("open -> resolved");
        let error = record
            .apply_status(ComplaintStatus::Open, None, "admin", 3, now)
            .expect_err("resolved -> open is not allowed");
        assert_eq!(
            error,
            DomainError::InvalidComplaintTransition {
                from: ComplaintStatus::Resolved,
                to: ComplaintStatus::Open
            }
        );
        assert_eq!(record.resolution_notes.as_deref(), Some("refund issued"));

        let entry = record
            .apply_status(ComplaintStatus::InReview, None, "admin", 3, now)
            .expect("resolved -> in_review");
        assert_eq!(entry.from_status, Some(ComplaintStatus::Resolved));
        assert_eq!(record.resolution_notes.as_deref(), Some("refund issued"));
    }

    #[test]
    fn filter_matches_on_every_populated_field() {
        let now = Utc::now();
        let (record, _) =
            ComplaintRecord::open(ComplaintId::generate(now), draft(), "dialogue", now);

        assert!(ComplaintFilter::default().matches(&record));
        assert!(ComplaintFilter {
            status: Some(ComplaintStatus::Open),
            category: Some(ComplaintCategory::DamagedItem),
            created_from: Some(now - Duration::hours(1)),
            created_to: Some(now + Duration::hours(1)),
            order_id: Some(OrderId("ORD-001".to_owned())),
        }
        .matches(&record));
        assert!(!ComplaintFilter { status: Some(ComplaintStatus::Resolved), ..Default::default() }
            .matches(&record));
        assert!(!ComplaintFilter { created_to: Some(record.created_at), ..Default::default() }
            .matches(&record));
    }
}
