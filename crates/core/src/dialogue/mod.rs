pub mod engine;
pub mod intent;
pub mod language;
pub mod session;
pub mod states;
pub mod table;

pub use engine::DialogueEngine;
pub use intent::{Intent, IntentClassifier};
pub use language::Language;
pub use session::{
    ComplaintDraftScratch, Session, SessionId, Speaker, Turn, DEFAULT_HISTORY_LIMIT,
};
pub use states::{DialogueAction, DialogueState, InputKind, TransitionContext, TransitionOutcome};
pub use table::{TableError, Target, TransitionRule, TransitionTable};
