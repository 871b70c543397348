//! Support agent runtime.
//!
//! Drives customer conversations on top of `trustline-core`:
//! - `classify` maps each message to the dialogue input kind for the
//!   session's current state, looking orders up where verification needs it
//! - `runtime` applies the transition and performs its action
//! - `grounding` answers policy questions from retrieved knowledge only
//! - `llm` and `attachments` are the external collaborators
//!
//! # Safety Principle
//!
//! The language model only phrases answers to policy questions. It never
//! decides a transition, verifies an order, or files a complaint; those are
//! deterministic steps of the transition table.

pub mod attachments;
pub mod classify;
pub mod grounding;
pub mod guardrails;
pub mod llm;
pub mod replies;
pub mod runtime;
pub mod sessions;

pub use attachments::{AttachmentExtractor, ExtractionError, PlainTextExtractor};
pub use classify::{Classification, TurnClassifier, TurnFacts};
pub use grounding::{
    Citation, ConversationContext, GenerationError, GenerationSettings, GroundedAnswer,
    GroundedAnswerGenerator,
};
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{client_from_config, embedder_from_config, LlmClient, LlmError, ScriptedLlmClient};
pub use replies::ReplyBook;
pub use runtime::{RuntimeDeps, RuntimeError, SupportRuntime, TurnReply};
pub use sessions::SessionTable;
