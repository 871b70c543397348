//! Maps one customer message to exactly one [`InputKind`] for the session's
//! current state, together with the facts the transition's action needs.
//!
//! Safety comes first: a message the guardrails deny is `Unsafe` in every
//! state. Order verification consults the order repository here, so the
//! transition table itself stays free of lookups.

use std::sync::Arc;

use trustline_core::config::AppConfig;
use trustline_core::dialogue::{DialogueState, InputKind, Intent, IntentClassifier, Session};
use trustline_core::domain::complaint::ComplaintCategory;
use trustline_core::domain::order::{Order, OrderId, OrderStatus, PhoneNumber};
use trustline_core::normalizer::{FreeText, InputNormalizer, ValidationError};
use trustline_db::repositories::{OrderRepository, RepositoryError};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};

/// Shortest digit run that is treated as an attempt at a phone number.
const MIN_PHONE_DIGITS: usize = 7;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnFacts {
    None,
    Safety { reason_code: String },
    OrderId(OrderId),
    Verified { order: Order, phone: PhoneNumber },
    Candidates(Vec<OrderId>),
    Mismatch,
    Category(ComplaintCategory),
    Ineligible { category: ComplaintCategory, status: OrderStatus },
    Details(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub kind: InputKind,
    pub facts: TurnFacts,
    /// Normalized message text; empty when the message had no text.
    pub text: String,
}

impl Classification {
    fn new(kind: InputKind, text: &str) -> Self {
        Self { kind, facts: TurnFacts::None, text: text.to_owned() }
    }

    fn with(kind: InputKind, facts: TurnFacts, text: &str) -> Self {
        Self { kind, facts, text: text.to_owned() }
    }
}

pub struct TurnClassifier {
    normalizer: InputNormalizer,
    intents: IntentClassifier,
    guardrails: GuardrailPolicy,
    orders: Arc<dyn OrderRepository>,
    max_phone_attempts: u32,
    min_detail_chars: usize,
}

impl TurnClassifier {
    pub fn new(config: &AppConfig, orders: Arc<dyn OrderRepository>) -> Self {
        Self {
            normalizer: InputNormalizer::new(&config.normalizer),
            intents: IntentClassifier::new(),
            guardrails: GuardrailPolicy::from_config(&config.normalizer),
            orders,
            max_phone_attempts: config.dialogue.max_phone_attempts.max(1),
            min_detail_chars: config.dialogue.min_detail_chars,
        }
    }

    pub fn normalizer(&self) -> &InputNormalizer {
        &self.normalizer
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    pub async fn classify(
        &self,
        session: &Session,
        raw: &str,
    ) -> Result<Classification, RepositoryError> {
        let state = session.state;
        let text = match self.normalizer.free_text(raw) {
            Ok(text) => text,
            Err(ValidationError::Empty { .. }) | Err(ValidationError::InvalidFormat { .. }) => {
                return Ok(Classification::new(empty_input_kind(state), ""));
            }
        };

        if let Some(safety) = self.safety_override(state, &text) {
            return Ok(safety);
        }
        let message = text.text.as_str();
        if state == DialogueState::SafetyBlocked {
            return Ok(Classification::new(InputKind::Unrecognized, message));
        }

        match state {
            DialogueState::AwaitingOrderId => Ok(self.awaiting_order_id(session, message)),
            DialogueState::AwaitingPhone => self.awaiting_phone(session, message).await,
            DialogueState::ComplaintCategorySelection => {
                self.category_selection(session, message).await
            }
            DialogueState::ComplaintDetailCollection => Ok(self.detail_collection(message)),
            _ => Ok(self.general(state, message)),
        }
    }

    fn safety_override(&self, state: DialogueState, text: &FreeText) -> Option<Classification> {
        let decision = self.guardrails.evaluate(text);
        let kind = decision.input_kind()?;
        // Complaint descriptions are often heated; only a block stops them.
        if matches!(decision, GuardrailDecision::Degrade { .. })
            && state == DialogueState::ComplaintDetailCollection
        {
            return None;
        }
        let reason_code = decision.reason_code().unwrap_or_default().to_owned();
        Some(Classification::with(kind, TurnFacts::Safety { reason_code }, &text.text))
    }

    fn general(&self, state: DialogueState, message: &str) -> Classification {
        if matches!(state, DialogueState::Start | DialogueState::PolicyQa) {
            if let Some(order_id) = self.find_order_id(message) {
                return Classification::with(
                    InputKind::OrderIdAccepted,
                    TurnFacts::OrderId(order_id),
                    message,
                );
            }
        }

        let kind = match self.intents.classify(message) {
            Intent::ForgotOrderId => InputKind::ForgotOrderId,
            Intent::Complaint => InputKind::ComplaintIntent,
            Intent::PolicyQuestion => InputKind::PolicyQuestion,
            Intent::OrderInquiry => InputKind::OrderIntent,
            Intent::Greeting => InputKind::Greeting,
            Intent::OffTopic => InputKind::OffTopic,
            Intent::Cancel => InputKind::Unrecognized,
            Intent::Unclear if state == DialogueState::PolicyQa => InputKind::PolicyQuestion,
            Intent::Unclear if self.intents.looks_like_question(message) => {
                InputKind::PolicyQuestion
            }
            Intent::Unclear => InputKind::Unrecognized,
        };
        Classification::new(kind, message)
    }

    fn awaiting_order_id(&self, session: &Session, message: &str) -> Classification {
        if let Some(order_id) = self.find_order_id(message) {
            let listed = session.candidate_orders.is_empty()
                || session.candidate_orders.contains(&order_id);
            return if listed {
                Classification::with(InputKind::OrderIdAccepted, TurnFacts::OrderId(order_id), message)
            } else {
                Classification::new(InputKind::InvalidFormat, message)
            };
        }

        let kind = match self.intents.classify(message) {
            Intent::Cancel => InputKind::Cancel,
            Intent::ForgotOrderId => InputKind::ForgotOrderId,
            Intent::PolicyQuestion => InputKind::PolicyQuestion,
            Intent::OffTopic => InputKind::OffTopic,
            _ => InputKind::InvalidFormat,
        };
        Classification::new(kind, message)
    }

    async fn awaiting_phone(
        &self,
        session: &Session,
        message: &str,
    ) -> Result<Classification, RepositoryError> {
        let phone = phone_candidate(message).and_then(|run| self.normalizer.phone_number(run).ok());
        let Some(phone) = phone else {
            let kind = match self.intents.classify(message) {
                Intent::Cancel => InputKind::Cancel,
                Intent::PolicyQuestion => InputKind::PolicyQuestion,
                Intent::OffTopic => InputKind::OffTopic,
                _ => InputKind::InvalidFormat,
            };
            return Ok(Classification::new(kind, message));
        };

        match &session.pending_order {
            Some(order_id) => {
                let order = self.orders.find_by_id(order_id).await?;
                match order {
                    Some(order) if order.belongs_to(&phone) => Ok(Classification::with(
                        InputKind::PhoneVerified,
                        TurnFacts::Verified { order, phone },
                        message,
                    )),
                    _ => Ok(self.mismatch(session, message)),
                }
            }
            None => {
                let mut owned = self.orders.find_by_phone(&phone).await?;
                match owned.len() {
                    0 => Ok(self.mismatch(session, message)),
                    1 => {
                        let order = owned.remove(0);
                        Ok(Classification::with(
                            InputKind::PhoneVerified,
                            TurnFacts::Verified { order, phone },
                            message,
                        ))
                    }
                    _ => Ok(Classification::with(
                        InputKind::PhoneMultipleOrders,
                        TurnFacts::Candidates(owned.into_iter().map(|order| order.id).collect()),
                        message,
                    )),
                }
            }
        }
    }

    fn mismatch(&self, session: &Session, message: &str) -> Classification {
        let kind = if session.phone_mismatches + 1 >= self.max_phone_attempts {
            InputKind::PhoneMismatchLimit
        } else {
            InputKind::PhoneMismatch
        };
        Classification::with(kind, TurnFacts::Mismatch, message)
    }

    async fn category_selection(
        &self,
        session: &Session,
        message: &str,
    ) -> Result<Classification, RepositoryError> {
        let intent = self.intents.classify(message);
        if intent == Intent::Cancel {
            return Ok(Classification::new(InputKind::Cancel, message));
        }
        let Some(category) = self.intents.detect_category(message) else {
            let kind = if intent == Intent::OffTopic {
                InputKind::OffTopic
            } else {
                InputKind::InvalidFormat
            };
            return Ok(Classification::new(kind, message));
        };

        if category.requires_delivery() {
            let status = match &session.verified_order {
                Some(order_id) => self.orders.find_by_id(order_id).await?.map(|order| order.status),
                None => None,
            };
            match status {
                Some(status) if status.is_delivered() => {}
                Some(status) => {
                    return Ok(Classification::with(
                        InputKind::CategoryIneligible,
                        TurnFacts::Ineligible { category, status },
                        message,
                    ));
                }
                None => {
                    return Ok(Classification::with(
                        InputKind::CategoryIneligible,
                        TurnFacts::Ineligible { category, status: OrderStatus::Received },
                        message,
                    ));
                }
            }
        }
        Ok(Classification::with(InputKind::CategorySelected, TurnFacts::Category(category), message))
    }

    fn detail_collection(&self, message: &str) -> Classification {
        match self.intents.classify(message) {
            Intent::Cancel => return Classification::new(InputKind::Cancel, message),
            Intent::OffTopic => return Classification::new(InputKind::OffTopic, message),
            _ => {}
        }
        if message.chars().count() < self.min_detail_chars {
            return Classification::new(InputKind::InvalidFormat, message);
        }
        Classification::with(
            InputKind::DetailsProvided,
            TurnFacts::Details(message.to_owned()),
            message,
        )
    }

    /// First well-formed order id in the message, whole or split across two
    /// adjacent words (`ORD 001`).
    pub fn find_order_id(&self, message: &str) -> Option<OrderId> {
        if let Ok(order_id) = self.normalizer.order_id(message) {
            return Some(order_id);
        }
        let words: Vec<&str> = message
            .split_whitespace()
            .map(|word| word.trim_matches(|ch: char| !(ch.is_alphanumeric() || ch == '-')))
            .filter(|word| !word.is_empty())
            .collect();
        for (index, word) in words.iter().enumerate() {
            if let Ok(order_id) = self.normalizer.order_id(word) {
                return Some(order_id);
            }
            if let Some(next) = words.get(index + 1) {
                if let Ok(order_id) = self.normalizer.order_id(&format!("{word} {next}")) {
                    return Some(order_id);
                }
            }
        }
        None
    }

    /// Replaces every phone number in `message` with its masked form before
    /// the text is kept in session history.
    pub fn mask_phones(&self, message: &str) -> String {
        let mut masked = message.to_owned();
        let mut search_from = 0;
        while let Some(run) = phone_candidate(&masked[search_from..]) {
            let Some(offset) = masked[search_from..].find(run) else {
                break;
            };
            let start = search_from + offset;
            let end = start + run.len();
            match self.normalizer.phone_number(run) {
                Ok(phone) => {
                    let replacement = phone.masked();
                    masked.replace_range(start..end, &replacement);
                    search_from = start + replacement.len();
                }
                Err(_) => search_from = end,
            }
        }
        masked
    }
}

fn empty_input_kind(state: DialogueState) -> InputKind {
    match state {
        DialogueState::AwaitingOrderId
        | DialogueState::AwaitingPhone
        | DialogueState::ComplaintCategorySelection
        | DialogueState::ComplaintDetailCollection => InputKind::InvalidFormat,
        _ => InputKind::Unrecognized,
    }
}

fn is_digit(ch: char) -> bool {
    ch.is_ascii_digit() || ('\u{0660}'..='\u{0669}').contains(&ch) || ('\u{06F0}'..='\u{06F9}').contains(&ch)
}

fn is_phone_char(ch: char) -> bool {
    is_digit(ch) || matches!(ch, '+' | ' ' | '-' | '.' | '(' | ')' | '/')
}

/// First run of digits and phone separators holding enough digits to be a
/// phone number, trimmed of surrounding separators.
fn phone_candidate(message: &str) -> Option<&str> {
    let mut start = None;
    for (index, ch) in message.char_indices().chain(std::iter::once((message.len(), 'x'))) {
        match (is_phone_char(ch), start) {
            (true, None) => start = Some(index),
            (false, Some(from)) => {
                let run = message[from..index]
                    .trim_matches(|ch: char| !(is_digit(ch) || ch == '+' || ch == '('));
                let run = run.trim_end_matches('(');
                if run.chars().filter(|ch| is_digit(*ch)).count() >= MIN_PHONE_DIGITS {
                    return Some(run);
                }
                start = None;
            }
            _ => {}
        }
    }
    None
}
