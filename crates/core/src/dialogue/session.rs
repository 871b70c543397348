use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dialogue::language::Language;
use crate::dialogue::states::DialogueState;
use crate::domain::complaint::{ComplaintCategory, ComplaintId};
use crate::domain::order::{OrderId, PhoneNumber};

/// Turns kept on a session unless the owner configures another cap.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("sess-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Customer,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Complaint being drafted; detached from the session once filed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintDraftScratch {
    pub category: Option<ComplaintCategory>,
    pub evidence: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub state: DialogueState,
    pub language: Option<Language>,
    pub verified_order: Option<OrderId>,
    pub verified_phone: Option<PhoneNumber>,
    pub pending_order: Option<OrderId>,
    pub candidate_orders: Vec<OrderId>,
    pub phone_mismatches: u32,
    pub resume_state: Option<DialogueState>,
    pub draft: Option<ComplaintDraftScratch>,
    pub last_complaint: Option<ComplaintId>,
    /// Oldest turns first; never longer than `history_limit`.
    pub history: Vec<Turn>,
    pub history_limit: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: DialogueState::Start,
            language: None,
            verified_order: None,
            verified_phone: None,
            pending_order: None,
            candidate_orders: Vec::new(),
            phone_mismatches: 0,
            resume_state: None,
            draft: None,
            last_complaint: None,
            history: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self.trim_history();
        self
    }

    pub fn is_verified(&self) -> bool {
        self.verified_order.is_some()
    }

    /// Locks the conversation language on the first message that has words.
    pub fn lock_language(&mut self, text: &str) {
        if self.language.is_none() {
            self.language = Language::detect(text);
        }
    }

    pub fn language_or_default(&self) -> Language {
        self.language.unwrap_or(Language::En)
    }

    pub fn record_turn(&mut self, speaker: Speaker, text: impl Into<String>, at: DateTime<Utc>) {
        self.history.push(Turn { speaker, text: text.into(), at });
        self.trim_history();
        self.last_active_at = at;
    }

    fn trim_history(&mut self) {
        let excess = self.history.len().saturating_sub(self.history_limit);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }

    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_active_at > ttl
    }

    /// Verification succeeded: keep what the verified context needs and drop
    /// the rest of the verification scratch.
    pub fn mark_verified(&mut self, order: OrderId, phone: PhoneNumber) {
        self.verified_order = Some(order);
        self.verified_phone = Some(phone);
        self.pending_order = None;
        self.candidate_orders.clear();
        self.phone_mismatches = 0;
    }

    /// Abandons an in-progress verification. The mismatch counter survives so
    /// restarting does not reset the enumeration limit.
    pub fn clear_pending_verification(&mut self) {
        self.pending_order = None;
        self.candidate_orders.clear();
    }

    pub fn draft_mut(&mut self) -> &mut ComplaintDraftScratch {
        self.draft.get_or_insert_with(ComplaintDraftScratch::default)
    }

    pub fn discard_draft(&mut self) {
        self.draft = None;
    }
}
