use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::dialogue::states::{
    DialogueAction, DialogueState, InputKind, TransitionContext, TransitionOutcome,
};
use crate::dialogue::table::{TableError, Target, TransitionTable};

pub struct DialogueEngine {
    table: TransitionTable,
}

impl DialogueEngine {
    pub fn new(table: TransitionTable) -> Self {
        Self { table }
    }

    pub fn builtin() -> Result<Self, TableError> {
        TransitionTable::builtin().map(Self::new)
    }

    pub fn initial_state(&self) -> DialogueState {
        DialogueState::Start
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Total over every (state, input) pair: unmatched combinations re-prompt
    /// in the current state.
    pub fn apply(
        &self,
        current: DialogueState,
        input: InputKind,
        context: &TransitionContext,
    ) -> TransitionOutcome {
        match self.table.lookup(current, input, context) {
            Some((index, rule)) => {
                let (to, resumed) = match rule.target {
                    Target::State(state) => (state, false),
                    Target::Stay => (current, false),
                    Target::Resume => (
                        context
                            .resume_state
                            .filter(|state| state.is_resumable())
                            .unwrap_or(DialogueState::Start),
                        true,
                    ),
                };
                TransitionOutcome {
                    from: current,
                    to,
                    input,
                    action: rule.action,
                    rule_index: Some(index),
                    resumed,
                }
            }
            None => TransitionOutcome {
                from: current,
                to: current,
                input,
                action: DialogueAction::RepromptCurrentState,
                rule_index: None,
                resumed: false,
            },
        }
    }

    pub fn apply_with_audit<S>(
        &self,
        current: DialogueState,
        input: InputKind,
        context: &TransitionContext,
        sink: &S,
        audit: &AuditContext,
    ) -> TransitionOutcome
    where
        S: AuditSink + ?Sized,
    {
        let outcome = self.apply(current, input, context);
        let (category, event_type) = if outcome.to == DialogueState::SafetyBlocked {
            (AuditCategory::Safety, "dialogue.transition_applied")
        } else if outcome.is_fallback() {
            (AuditCategory::Dialogue, "dialogue.transition_defaulted")
        } else {
            (AuditCategory::Dialogue, "dialogue.transition_applied")
        };
        sink.emit(
            AuditEvent::new(audit, event_type, category, AuditOutcome::Success)
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("input", outcome.input.as_str())
                .with_metadata("action", outcome.action.as_str())
                .with_metadata(
                    "rule",
                    outcome.rule_index.map_or_else(|| "default".to_owned(), |i| i.to_string()),
                ),
        );
        outcome
    }
}
