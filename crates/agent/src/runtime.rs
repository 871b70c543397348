//! One customer turn, end to end.
//!
//! The runtime classifies the message against the session's state, asks the
//! dialogue engine for the transition, then performs the transition's action.
//! Only `AnswerPolicyQuestion` reaches the retriever and the text-generation
//! collaborator. Actions that touch a collaborator run against a copy of the
//! session taken before the turn: if one fails, the copy is restored and the
//! customer is asked to retry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use trustline_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use trustline_core::config::AppConfig;
use trustline_core::dialogue::{
    DialogueAction, DialogueEngine, DialogueState, Language, Session, SessionId, Speaker,
    TableError, TransitionContext, TransitionOutcome, TransitionTable,
};
use trustline_core::domain::complaint::{ComplaintDraft, ComplaintId};
use trustline_core::errors::{ApplicationError, DomainError};
use trustline_core::knowledge::{Embedder, EmbeddingError, KnowledgeBase, Retriever};
use trustline_db::repositories::{ComplaintRepository, OrderRepository, RepositoryError};

use crate::attachments::{AttachmentExtractor, ExtractionError};
use crate::classify::{Classification, TurnClassifier, TurnFacts};
use crate::grounding::{
    Citation, ConversationContext, GenerationError, GenerationSettings, GroundedAnswerGenerator,
};
use crate::llm::LlmClient;
use crate::replies::ReplyBook;
use crate::sessions::{SessionHandle, SessionTable};

const RUNTIME_ACTOR: &str = "support-runtime";
const COMPLAINT_ACTOR: &str = "dialogue";

/// Collaborators the runtime is wired with.
pub struct RuntimeDeps {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn Embedder>,
    pub knowledge: Arc<KnowledgeBase>,
    pub orders: Arc<dyn OrderRepository>,
    pub complaints: Arc<dyn ComplaintRepository>,
    pub extractor: Arc<dyn AttachmentExtractor>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session `{0}` was not found or has expired")]
    SessionNotFound(SessionId),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::SessionNotFound(id) => {
                ApplicationError::NotFound { entity: "session", id: id.0 }
            }
            RuntimeError::Table(table) => ApplicationError::Domain(DomainError::from(table)),
            RuntimeError::Generation(generation) => {
                ApplicationError::Configuration(generation.to_string())
            }
        }
    }
}

/// Why an action could not be completed; the turn is rolled back.
#[derive(Debug, Error)]
enum TurnFailure {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Retrieval(#[from] EmbeddingError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("complaint draft has no category")]
    MissingCategory,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub state: DialogueState,
    pub language: Language,
    pub reply: String,
    pub transitions: Vec<TransitionOutcome>,
    pub complaint_id: Option<ComplaintId>,
    pub citations: Vec<Citation>,
}

#[derive(Default)]
struct Performed {
    reply: String,
    complaint_id: Option<ComplaintId>,
    citations: Vec<Citation>,
}

impl Performed {
    fn say(reply: String) -> Self {
        Self { reply, ..Self::default() }
    }
}

pub struct SupportRuntime {
    engine: DialogueEngine,
    classifier: TurnClassifier,
    replies: ReplyBook,
    retriever: Retriever,
    generator: GroundedAnswerGenerator,
    knowledge: Arc<KnowledgeBase>,
    orders: Arc<dyn OrderRepository>,
    complaints: Arc<dyn ComplaintRepository>,
    extractor: Arc<dyn AttachmentExtractor>,
    audit: Arc<dyn AuditSink>,
    sessions: SessionTable,
    history_window_turns: usize,
    max_phone_attempts: u32,
}

impl SupportRuntime {
    pub fn new(config: &AppConfig, deps: RuntimeDeps) -> Result<Self, RuntimeError> {
        let table = match &config.dialogue.transitions_path {
            Some(path) => TransitionTable::from_path(path)?,
            None => TransitionTable::builtin()?,
        };
        let ttl_secs = i64::try_from(config.dialogue.session_ttl_secs).unwrap_or(i64::MAX);
        let model = deps.llm.model().to_owned();
        let generator =
            GroundedAnswerGenerator::new(deps.llm, GenerationSettings::from_config(config))?;

        info!(
            event_name = "runtime.ready",
            rules = table.rules().len(),
            model = %model,
            "support runtime ready"
        );
        Ok(Self {
            engine: DialogueEngine::new(table),
            classifier: TurnClassifier::new(config, Arc::clone(&deps.orders)),
            replies: ReplyBook::new(&config.normalizer),
            retriever: Retriever::new(deps.embedder, config.knowledge.retrieval()),
            generator,
            knowledge: deps.knowledge,
            orders: deps.orders,
            complaints: deps.complaints,
            extractor: deps.extractor,
            audit: deps.audit,
            sessions: SessionTable::new(Duration::seconds(ttl_secs))
                .with_history_limit(config.dialogue.max_stored_turns),
            history_window_turns: config.dialogue.history_window_turns,
            max_phone_attempts: config.dialogue.max_phone_attempts.max(1),
        })
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn engine(&self) -> &DialogueEngine {
        &self.engine
    }

    /// Opens a session and greets in the default language; the language locks
    /// on the customer's first message.
    pub async fn open_session(&self) -> TurnReply {
        let now = Utc::now();
        let (session_id, handle) = self.sessions.open(now).await;
        let mut session = handle.lock().await;
        let language = session.language_or_default();
        let reply = self.replies.greet(language);
        session.record_turn(Speaker::Assistant, reply.clone(), now);
        TurnReply {
            session_id,
            state: session.state,
            language,
            reply,
            transitions: Vec::new(),
            complaint_id: None,
            citations: Vec::new(),
        }
    }

    /// Handles one customer message. Without a session id a new session is
    /// opened for it.
    pub async fn handle_message(
        &self,
        session_id: Option<&SessionId>,
        text: &str,
    ) -> Result<TurnReply, RuntimeError> {
        let now = Utc::now();
        let handle = self.session_handle(session_id, now).await?;
        let mut session = handle.lock().await;

        let audit = AuditContext::new(
            Some(session.id.0.clone()),
            Uuid::new_v4().to_string(),
            RUNTIME_ACTOR,
        );
        session.lock_language(text);
        let recorded = self
            .classifier
            .normalizer()
            .free_text(text)
            .map(|free| self.classifier.mask_phones(&free.text))
            .unwrap_or_default();
        let before = session.clone();

        let (performed, transitions) = match self.run_turn(&mut session, text, &audit).await {
            Ok(done) => done,
            Err(failure) => {
                *session = before;
                warn!(
                    event_name = "dialogue.effect_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %session.id,
                    state = %session.state,
                    error = %failure,
                    "turn rolled back"
                );
                self.audit.emit(
                    AuditEvent::new(
                        &audit,
                        "dialogue.effect_failed",
                        AuditCategory::Dialogue,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("state", session.state.as_str())
                    .with_metadata("error", failure.to_string()),
                );
                let reply = self.replies.retry_later(session.language_or_default());
                (Performed::say(reply), Vec::new())
            }
        };

        session.record_turn(Speaker::Customer, recorded, now);
        session.record_turn(Speaker::Assistant, performed.reply.clone(), Utc::now());
        info!(
            event_name = "dialogue.turn_completed",
            correlation_id = %audit.correlation_id,
            session_id = %session.id,
            state = %session.state,
            transitions = transitions.len(),
            "turn completed"
        );
        Ok(TurnReply {
            session_id: session.id.clone(),
            state: session.state,
            language: session.language_or_default(),
            reply: performed.reply,
            transitions,
            complaint_id: performed.complaint_id,
            citations: performed.citations,
        })
    }

    /// Adds an attachment's text to the complaint being drafted. The dialogue
    /// state never changes here.
    pub async fn handle_attachment(
        &self,
        session_id: &SessionId,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<TurnReply, RuntimeError> {
        let now = Utc::now();
        let handle = self.session_handle(Some(session_id), now).await?;
        let mut session = handle.lock().await;
        let language = session.language_or_default();
        let audit = AuditContext::new(
            Some(session.id.0.clone()),
            Uuid::new_v4().to_string(),
            RUNTIME_ACTOR,
        );

        let reply = if !session.state.is_drafting() {
            self.replies.attachment_not_expected(language)
        } else {
            let extracted = self.extractor.extract(bytes, media_type).await.and_then(|text| {
                self.classifier
                    .normalizer()
                    .free_text(&text)
                    .map_err(|_| ExtractionError::Empty)
            });
            match extracted {
                Ok(evidence) => {
                    session.draft_mut().evidence.push(evidence.text);
                    self.audit.emit(
                        AuditEvent::new(
                            &audit,
                            "complaint.attachment_added",
                            AuditCategory::Complaint,
                            AuditOutcome::Success,
                        )
                        .with_metadata("media_type", media_type),
                    );
                    self.replies.attachment_received(language)
                }
                Err(error) => {
                    warn!(
                        event_name = "complaint.attachment_rejected",
                        correlation_id = %audit.correlation_id,
                        session_id = %session.id,
                        error = %error,
                        "attachment rejected"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            &audit,
                            "complaint.attachment_rejected",
                            AuditCategory::Complaint,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("media_type", media_type)
                        .with_metadata("error", error.to_string()),
                    );
                    self.replies.attachment_rejected(language, &error)
                }
            }
        };

        session.record_turn(Speaker::Customer, format!("[attachment {media_type}]"), now);
        session.record_turn(Speaker::Assistant, reply.clone(), Utc::now());
        Ok(TurnReply {
            session_id: session.id.clone(),
            state: session.state,
            language,
            reply,
            transitions: Vec::new(),
            complaint_id: None,
            citations: Vec::new(),
        })
    }

    pub async fn close_session(&self, session_id: &SessionId) -> bool {
        self.sessions.close(session_id).await
    }

    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.sessions.evict_expired(now).await
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.len().await
    }

    /// Copy of the session as it stands between turns.
    pub async fn session_snapshot(&self, session_id: &SessionId) -> Option<Session> {
        let handle = self.sessions.get(session_id, Utc::now()).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    async fn session_handle(
        &self,
        session_id: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> Result<SessionHandle, RuntimeError> {
        match session_id {
            Some(id) => self
                .sessions
                .get(id, now)
                .await
                .ok_or_else(|| RuntimeError::SessionNotFound(id.clone())),
            None => Ok(self.sessions.open(now).await.1),
        }
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        text: &str,
        audit: &AuditContext,
    ) -> Result<(Performed, Vec<TransitionOutcome>), TurnFailure> {
        let classification = self.classifier.classify(session, text).await?;
        let outcome = self.transition(session, &classification, audit);
        let mut transitions = vec![outcome];

        if !outcome.resumed {
            let performed = self.perform(session, &outcome, classification, audit).await?;
            return Ok((performed, transitions));
        }

        // Back from a detour: read the same message in the resumed state.
        let classification = self.classifier.classify(session, text).await?;
        let outcome = self.transition(session, &classification, audit);
        transitions.push(outcome);
        let performed = self.perform(session, &outcome, classification, audit).await?;
        Ok((performed, transitions))
    }

    fn transition(
        &self,
        session: &mut Session,
        classification: &Classification,
        audit: &AuditContext,
    ) -> TransitionOutcome {
        let context = TransitionContext {
            verified: session.is_verified(),
            resume_state: session.resume_state,
        };
        let outcome = self.engine.apply_with_audit(
            session.state,
            classification.kind,
            &context,
            self.audit.as_ref(),
            audit,
        );

        if outcome.resumed {
            session.resume_state = None;
        } else if outcome.to == DialogueState::OutOfScope && outcome.from.is_resumable() {
            session.resume_state = Some(outcome.from);
        }
        session.state = outcome.to;

        if let TurnFacts::Safety { reason_code } = &classification.facts {
            warn!(
                event_name = "safety.input_flagged",
                correlation_id = %audit.correlation_id,
                session_id = %session.id,
                input = %classification.kind,
                reason_code = %reason_code,
                "guardrail matched customer input"
            );
        }
        outcome
    }

    async fn perform(
        &self,
        session: &mut Session,
        outcome: &TransitionOutcome,
        classification: Classification,
        audit: &AuditContext,
    ) -> Result<Performed, TurnFailure> {
        let language = session.language_or_default();
        let reply = match outcome.action {
            DialogueAction::Greet => self.replies.greet(language),
            DialogueAction::PromptForOrderId => {
                session.clear_pending_verification();
                self.replies.prompt_order_id(language)
            }
            DialogueAction::PromptForPhone => {
                if let TurnFacts::OrderId(order_id) = classification.facts {
                    session.candidate_orders.clear();
                    session.pending_order = Some(order_id);
                }
                self.replies.prompt_phone(language)
            }
            DialogueAction::PromptForPhoneLookup => {
                session.clear_pending_verification();
                self.replies.prompt_phone_lookup(language)
            }
            DialogueAction::RepromptInvalidFormat => match session.state {
                DialogueState::AwaitingOrderId => {
                    self.replies.invalid_order_id(language, &session.candidate_orders)
                }
                DialogueState::AwaitingPhone => self.replies.invalid_phone(language),
                state => self.state_prompt(session, state),
            },
            DialogueAction::ConfirmVerification => match classification.facts {
                TurnFacts::Verified { order, phone } => {
                    session.mark_verified(order.id.clone(), phone);
                    self.replies.verified(language, &order)
                }
                _ => self.state_prompt(session, session.state),
            },
            DialogueAction::ListCandidateOrders => {
                if let TurnFacts::Candidates(ids) = classification.facts {
                    session.pending_order = None;
                    session.candidate_orders = ids;
                }
                self.replies.candidates(language, &session.candidate_orders)
            }
            DialogueAction::ReportPhoneMismatch => {
                session.phone_mismatches += 1;
                session.clear_pending_verification();
                let attempts_left = self.max_phone_attempts.saturating_sub(session.phone_mismatches);
                self.replies.phone_mismatch(language, attempts_left)
            }
            DialogueAction::ReportOrderStatus => {
                let order = match &session.verified_order {
                    Some(order_id) => self.orders.find_by_id(order_id).await?,
                    None => None,
                };
                match order {
                    Some(order) => self.replies.order_status(language, &order),
                    None => self.state_prompt(session, session.state),
                }
            }
            DialogueAction::PromptForCategory => {
                if outcome.from == outcome.to {
                    session.draft_mut();
                } else {
                    session.draft = Some(Default::default());
                }
                self.replies.category_menu(language)
            }
            DialogueAction::ExplainCategoryIneligible => match classification.facts {
                TurnFacts::Ineligible { category, status } => {
                    self.replies.category_ineligible(language, category, status)
                }
                _ => self.replies.category_menu(language),
            },
            DialogueAction::PromptForDetails => {
                if let TurnFacts::Category(category) = classification.facts {
                    session.draft_mut().category = Some(category);
                }
                let category = session.draft.as_ref().and_then(|draft| draft.category);
                self.replies.prompt_details(language, category)
            }
            DialogueAction::FileComplaint => {
                return self.file_complaint(session, classification, audit).await;
            }
            DialogueAction::CancelComplaint => {
                session.discard_draft();
                self.replies.complaint_cancelled(language)
            }
            DialogueAction::CancelVerification => {
                session.clear_pending_verification();
                self.replies.verification_cancelled(language)
            }
            DialogueAction::AnswerPolicyQuestion => {
                return self.answer_policy_question(session, &classification.text, audit).await;
            }
            DialogueAction::DeclineOutOfScope => self.replies.out_of_scope(language),
            DialogueAction::ResumeConversation => self.state_prompt(session, session.state),
            DialogueAction::Deescalate => format!(
                "{} {}",
                self.replies.deescalate(language),
                self.state_prompt(session, session.state)
            ),
            DialogueAction::BlockSession => {
                if classification.facts == TurnFacts::Mismatch {
                    session.phone_mismatches += 1;
                }
                session.clear_pending_verification();
                session.discard_draft();
                self.replies.blocked(language)
            }
            DialogueAction::RepromptCurrentState => self.state_prompt(session, session.state),
        };
        Ok(Performed::say(reply))
    }

    async fn file_complaint(
        &self,
        session: &mut Session,
        classification: Classification,
        audit: &AuditContext,
    ) -> Result<Performed, TurnFailure> {
        let description = match classification.facts {
            TurnFacts::Details(description) => description,
            _ => classification.text,
        };
        let scratch = session.draft.clone().unwrap_or_default();
        let category = scratch.category.ok_or(TurnFailure::MissingCategory)?;
        let draft = ComplaintDraft {
            category,
            description,
            order_id: session.verified_order.clone(),
            evidence: scratch.evidence,
            session_id: Some(session.id.0.clone()),
        };

        let record = self.complaints.create(draft, COMPLAINT_ACTOR).await?;
        session.last_complaint = Some(record.id.clone());
        session.discard_draft();

        info!(
            event_name = "complaint.filed",
            correlation_id = %audit.correlation_id,
            session_id = %session.id,
            complaint_id = %record.id,
            category = %record.category,
            "complaint filed"
        );
        self.audit.emit(
            AuditEvent::new(audit, "complaint.filed", AuditCategory::Complaint, AuditOutcome::Success)
                .with_metadata("complaint_id", record.id.0.clone())
                .with_metadata("category", record.category.to_string()),
        );
        Ok(Performed {
            reply: self.replies.complaint_filed(session.language_or_default(), &record.id),
            complaint_id: Some(record.id),
            citations: Vec::new(),
        })
    }

    async fn answer_policy_question(
        &self,
        session: &Session,
        question: &str,
        audit: &AuditContext,
    ) -> Result<Performed, TurnFailure> {
        let snapshot = self.knowledge.snapshot();
        let retrieved = self.retriever.retrieve_default(&snapshot, question).await?;
        let context = ConversationContext {
            language: session.language_or_default(),
            history: session.recent_turns(self.history_window_turns),
        };
        let answer = self.generator.generate(question, &retrieved, &context).await?;

        self.audit.emit(
            AuditEvent::new(
                audit,
                "knowledge.question_answered",
                AuditCategory::Knowledge,
                AuditOutcome::Success,
            )
            .with_metadata("index_version", snapshot.version.to_string())
            .with_metadata("retrieved", retrieved.len().to_string())
            .with_metadata("grounded", answer.grounded.to_string())
            .with_metadata("attempts", answer.attempts.to_string()),
        );
        Ok(Performed { reply: answer.text, complaint_id: None, citations: answer.citations })
    }

    fn state_prompt(&self, session: &Session, state: DialogueState) -> String {
        self.replies.state_prompt(
            session.language_or_default(),
            state,
            &session.candidate_orders,
            session.last_complaint.as_ref(),
        )
    }
}
