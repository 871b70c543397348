use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::dialogue::states::{DialogueAction, DialogueState, InputKind, TransitionContext};

const DEFAULT_TABLE: &str = include_str!("default_transitions.toml");
const WILDCARD: &str = "*";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("could not read transition table `{path}`: {message}")]
    Read { path: String, message: String },
    #[error("could not parse transition table: {0}")]
    Parse(String),
    #[error("transition table has no rules")]
    Empty,
    #[error("rule {rule}: unknown state `{value}`")]
    UnknownState { rule: usize, value: String },
    #[error("rule {rule}: unknown input kind `{value}`")]
    UnknownInput { rule: usize, value: String },
    #[error("rule {rule}: unknown action `{value}`")]
    UnknownAction { rule: usize, value: String },
    #[error("rule {rule}: `resume` is only valid from out_of_scope")]
    ResumeOutsideOutOfScope { rule: usize },
    #[error("rule {rule}: complaint_finalized may only enter drafting by starting a new complaint")]
    ReentersFinalizedDraft { rule: usize },
    #[error("unsafe input in `{state}` does not lead to safety_blocked")]
    SafetyNotPrioritized { state: DialogueState },
    #[error("`{input}` lets a session leave safety_blocked")]
    SafetyBlockEscapable { input: InputKind },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateMatcher {
    Any,
    OneOf(Vec<DialogueState>),
}

impl StateMatcher {
    pub fn matches(&self, state: DialogueState) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(states) => states.contains(&state),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMatcher {
    Any,
    Kind(InputKind),
}

impl InputMatcher {
    pub fn matches(self, input: InputKind) -> bool {
        match self {
            Self::Any => true,
            Self::Kind(kind) => kind == input,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    State(DialogueState),
    Stay,
    /// Return to the state parked before an off-topic detour.
    Resume,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: StateMatcher,
    pub on: InputMatcher,
    pub verified: Option<bool>,
    pub action: DialogueAction,
    pub target: Target,
}

impl TransitionRule {
    fn applies(&self, from: DialogueState, input: InputKind, context: &TransitionContext) -> bool {
        self.from.matches(from)
            && self.on.matches(input)
            && self.verified.map_or(true, |verified| verified == context.verified)
    }
}

/// Explicit (state, input) -> (action, next state) mapping. First matching
/// rule wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionTable {
    rules: Vec<TransitionRule>,
}

#[derive(Debug, Deserialize)]
struct TableDocument {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleDocument>,
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    from: Vec<String>,
    on: String,
    #[serde(default)]
    verified: Option<bool>,
    action: String,
    to: String,
}

impl TransitionTable {
    pub fn builtin() -> Result<Self, TableError> {
        Self::from_toml(DEFAULT_TABLE)
    }

    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let raw = fs::read_to_string(path).map_err(|error| TableError::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, TableError> {
        let document: TableDocument =
            toml::from_str(raw).map_err(|error| TableError::Parse(error.to_string()))?;
        if document.rules.is_empty() {
            return Err(TableError::Empty);
        }

        let rules = document
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| compile_rule(index, rule))
            .collect::<Result<Vec<_>, _>>()?;

        let table = Self { rules };
        table.validate()?;
        Ok(table)
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    pub fn lookup(
        &self,
        from: DialogueState,
        input: InputKind,
        context: &TransitionContext,
    ) -> Option<(usize, &TransitionRule)> {
        self.rules.iter().enumerate().find(|(_, rule)| rule.applies(from, input, context))
    }

    /// Whether a session may move from `from` to `to` in one step.
    pub fn permits(&self, from: DialogueState, to: DialogueState) -> bool {
        if from == to {
            return true;
        }
        InputKind::ALL.into_iter().any(|input| {
            [false, true].into_iter().any(|verified| {
                let context = TransitionContext { verified, resume_state: None };
                match self.lookup(from, input, &context).map(|(_, rule)| rule.target) {
                    Some(Target::State(state)) => state == to,
                    Some(Target::Resume) => to.is_resumable(),
                    Some(Target::Stay) | None => false,
                }
            })
        })
    }

    fn validate(&self) -> Result<(), TableError> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.target == Target::Resume
                && rule.from != StateMatcher::OneOf(vec![DialogueState::OutOfScope])
            {
                return Err(TableError::ResumeOutsideOutOfScope { rule: index });
            }
            if rule.from.matches(DialogueState::ComplaintFinalized) && reenters_draft(rule) {
                return Err(TableError::ReentersFinalizedDraft { rule: index });
            }
        }

        for state in DialogueState::ALL {
            for verified in [false, true] {
                let context = TransitionContext { verified, resume_state: None };
                let target = self.lookup(state, InputKind::Unsafe, &context).map(|(_, r)| r.target);
                let blocked = match target {
                    Some(Target::State(DialogueState::SafetyBlocked)) => true,
                    Some(Target::Stay) => state == DialogueState::SafetyBlocked,
                    _ => false,
                };
                if !blocked {
                    return Err(TableError::SafetyNotPrioritized { state });
                }
            }
        }

        for input in InputKind::ALL {
            for verified in [false, true] {
                let context = TransitionContext { verified, resume_state: None };
                let escapes = self
                    .lookup(DialogueState::SafetyBlocked, input, &context)
                    .is_some_and(|(_, rule)| {
                        !matches!(
                            rule.target,
                            Target::Stay | Target::State(DialogueState::SafetyBlocked)
                        )
                    });
                if escapes {
                    return Err(TableError::SafetyBlockEscapable { input });
                }
            }
        }

        Ok(())
    }
}

/// A finalized complaint may only reach a drafting state by opening a new
/// draft at category selection.
fn reenters_draft(rule: &TransitionRule) -> bool {
    let Target::State(state) = rule.target else {
        return false;
    };
    let new_draft = state == DialogueState::ComplaintCategorySelection
        && rule.action == DialogueAction::PromptForCategory;
    state.is_drafting() && !new_draft
}

fn compile_rule(index: usize, rule: RuleDocument) -> Result<TransitionRule, TableError> {
    let from = if rule.from.iter().any(|value| value.trim() == WILDCARD) {
        StateMatcher::Any
    } else {
        let states = rule
            .from
            .iter()
            .map(|value| {
                DialogueState::parse(value)
                    .ok_or_else(|| TableError::UnknownState { rule: index, value: value.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        StateMatcher::OneOf(states)
    };

    let on = if rule.on.trim() == WILDCARD {
        InputMatcher::Any
    } else {
        InputMatcher::Kind(
            InputKind::parse(&rule.on)
                .ok_or_else(|| TableError::UnknownInput { rule: index, value: rule.on.clone() })?,
        )
    };

    let action = DialogueAction::parse(&rule.action)
        .ok_or_else(|| TableError::UnknownAction { rule: index, value: rule.action.clone() })?;

    let target = match rule.to.trim() {
        "stay" => Target::Stay,
        "resume" => Target::Resume,
        other => Target::State(
            DialogueState::parse(other)
                .ok_or_else(|| TableError::UnknownState { rule: index, value: other.to_owned() })?,
        ),
    };

    Ok(TransitionRule { from, on, verified: rule.verified, action, target })
}

#[cfg(test)]
mod tests {
    use super::{TableError, Target, TransitionTable};
    use crate::dialogue::states::{DialogueAction, DialogueState, InputKind, TransitionContext};

    #[test]
    fn builtin_table_loads_and_validates() {
        let table = TransitionTable::builtin().expect("builtin table is valid");
        assert!(table.rules().len() > 20);

        let (index, rule) = table
            .lookup(DialogueState::Start, InputKind::Unsafe, &TransitionContext::default())
            .expect("unsafe input always matches");
        assert_eq!(index, 0, "safety rule is listed first");
        assert_eq!(rule.target, Target::State(DialogueState::SafetyBlocked));
    }

    #[test]
    fn verified_guard_selects_between_rules() {
        let table = TransitionTable::builtin().expect("builtin table is valid");
        let unverified = TransitionContext { verified: false, resume_state: None };
        let verified = TransitionContext { verified: true, resume_state: None };

        let (_, rule) = table
            .lookup(DialogueState::PolicyQa, InputKind::ComplaintIntent, &unverified)
            .expect("rule exists");
        assert_eq!(rule.target, Target::State(DialogueState::AwaitingOrderId));

        let (_, rule) = table
            .lookup(DialogueState::PolicyQa, InputKind::ComplaintIntent, &verified)
            .expect("rule exists");
        assert_eq!(rule.target, Target::State(DialogueState::ComplaintCategorySelection));
    }

    #[test]
    fn table_without_leading_safety_rule_is_rejected() {
        let raw = r#"
[[rule]]
from = ["start"]
on = "*"
action = "prompt_for_order_id"
to = "awaiting_order_id"

[[rule]]
from = ["*"]
on = "unsafe"
action = "block_session"
to = "safety_blocked"
"#;
        assert_eq!(
            TransitionTable::from_toml(raw),
            Err(TableError::SafetyNotPrioritized { state: DialogueState::Start })
        );
    }

    #[test]
    fn finalized_complaint_cannot_reenter_detail_collection() {
        let raw = r#"
[[rule]]
from = ["*"]
on = "unsafe"
action = "block_session"
to = "safety_blocked"

[[rule]]
from = ["complaint_finalized"]
on = "details_provided"
action = "prompt_for_details"
to = "complaint_detail_collection"
"#;
        assert_eq!(
            TransitionTable::from_toml(raw),
            Err(TableError::ReentersFinalizedDraft { rule: 1 })
        );
    }

    #[test]
    fn finalized_complaint_only_reaches_drafting_through_a_new_complaint() {
        let safety = r#"
[[rule]]
from = ["*"]
on = "unsafe"
action = "block_session"
to = "safety_blocked"
"#;
        let resumed_draft = format!(
            "{safety}{}",
            r#"
[[rule]]
from = ["complaint_finalized"]
on = "category_selected"
action = "prompt_for_details"
to = "complaint_category_selection"
"#
        );
        assert_eq!(
            TransitionTable::from_toml(&resumed_draft),
            Err(TableError::ReentersFinalizedDraft { rule: 1 })
        );

        let wildcard = format!(
            "{safety}{}",
            r#"
[[rule]]
from = ["*"]
on = "category_selected"
action = "prompt_for_details"
to = "complaint_detail_collection"
"#
        );
        assert_eq!(
            TransitionTable::from_toml(&wildcard),
            Err(TableError::ReentersFinalizedDraft { rule: 1 })
        );

        let new_complaint = format!(
            "{safety}{}",
            r#"
[[rule]]
from = ["complaint_finalized"]
on = "complaint_intent"
action = "prompt_for_category"
to = "complaint_category_selection"
"#
        );
        let table = TransitionTable::from_toml(&new_complaint).expect("a new complaint is allowed");
        assert!(table.permits(
            DialogueState::ComplaintFinalized,
            DialogueState::ComplaintCategorySelection
        ));
    }

    #[test]
    fn unknown_names_are_reported_with_rule_index() {
        let raw = r#"
[[rule]]
from = ["lobby"]
on = "unsafe"
action = "block_session"
to = "safety_blocked"
"#;
        assert_eq!(
            TransitionTable::from_toml(raw),
            Err(TableError::UnknownState { rule: 0, value: "lobby".to_owned() })
        );
        assert_eq!(TransitionTable::from_toml(""), Err(TableError::Empty));
    }

    #[test]
    fn permits_follows_declared_targets() {
        let table = TransitionTable::builtin().expect("builtin table is valid");
        assert!(table.permits(DialogueState::Start, DialogueState::AwaitingOrderId));
        assert!(table.permits(DialogueState::AwaitingPhone, DialogueState::SafetyBlocked));
        assert!(table.permits(DialogueState::OutOfScope, DialogueState::AwaitingPhone));
        assert!(!table.permits(DialogueState::Start, DialogueState::ComplaintFinalized));
        assert!(!table.permits(
            DialogueState::ComplaintFinalized,
            DialogueState::ComplaintDetailCollection
        ));
        assert!(!table.permits(DialogueState::SafetyBlocked, DialogueState::Start));
    }

    #[test]
    fn blocked_sessions_never_leave_safety_blocked() {
        let table = TransitionTable::builtin().expect("builtin table is valid");
        for input in InputKind::ALL {
            let (_, rule) = table
                .lookup(DialogueState::SafetyBlocked, input, &TransitionContext::default())
                .expect("blocked state has a catch-all rule");
            assert_eq!(rule.action, DialogueAction::BlockSession);
        }
    }
}
