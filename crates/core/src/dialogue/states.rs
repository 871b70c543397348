use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Start,
    AwaitingOrderId,
    AwaitingPhone,
    VerifiedOrderContext,
    ComplaintCategorySelection,
    ComplaintDetailCollection,
    ComplaintFinalized,
    #[serde(rename = "policy_qa")]
    PolicyQa,
    OutOfScope,
    SafetyBlocked,
}

impl DialogueState {
    pub const ALL: [DialogueState; 10] = [
        Self::Start,
        Self::AwaitingOrderId,
        Self::AwaitingPhone,
        Self::VerifiedOrderContext,
        Self::ComplaintCategorySelection,
        Self::ComplaintDetailCollection,
        Self::ComplaintFinalized,
        Self::PolicyQa,
        Self::OutOfScope,
        Self::SafetyBlocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AwaitingOrderId => "awaiting_order_id",
            Self::AwaitingPhone => "awaiting_phone",
            Self::VerifiedOrderContext => "verified_order_context",
            Self::ComplaintCategorySelection => "complaint_category_selection",
            Self::ComplaintDetailCollection => "complaint_detail_collection",
            Self::ComplaintFinalized => "complaint_finalized",
            Self::PolicyQa => "policy_qa",
            Self::OutOfScope => "out_of_scope",
            Self::SafetyBlocked => "safety_blocked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    /// States that hold an unfinished complaint draft.
    pub fn is_drafting(self) -> bool {
        matches!(self, Self::ComplaintCategorySelection | Self::ComplaintDetailCollection)
    }

    /// A conversation parked in one of these is not resumed after an
    /// off-topic detour.
    pub fn is_resumable(self) -> bool {
        !matches!(self, Self::OutOfScope | Self::SafetyBlocked)
    }
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified user input. The runtime maps every turn to exactly one kind
/// before consulting the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Unsafe,
    Flagged,
    OffTopic,
    Greeting,
    PolicyQuestion,
    OrderIntent,
    ComplaintIntent,
    ForgotOrderId,
    Cancel,
    OrderIdAccepted,
    InvalidFormat,
    PhoneVerified,
    PhoneMultipleOrders,
    PhoneMismatch,
    PhoneMismatchLimit,
    CategorySelected,
    CategoryIneligible,
    DetailsProvided,
    Unrecognized,
}

impl InputKind {
    pub const ALL: [InputKind; 19] = [
        Self::Unsafe,
        Self::Flagged,
        Self::OffTopic,
        Self::Greeting,
        Self::PolicyQuestion,
        Self::OrderIntent,
        Self::ComplaintIntent,
        Self::ForgotOrderId,
        Self::Cancel,
        Self::OrderIdAccepted,
        Self::InvalidFormat,
        Self::PhoneVerified,
        Self::PhoneMultipleOrders,
        Self::PhoneMismatch,
        Self::PhoneMismatchLimit,
        Self::CategorySelected,
        Self::CategoryIneligible,
        Self::DetailsProvided,
        Self::Unrecognized,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsafe => "unsafe",
            Self::Flagged => "flagged",
            Self::OffTopic => "off_topic",
            Self::Greeting => "greeting",
            Self::PolicyQuestion => "policy_question",
            Self::OrderIntent => "order_intent",
            Self::ComplaintIntent => "complaint_intent",
            Self::ForgotOrderId => "forgot_order_id",
            Self::Cancel => "cancel",
            Self::OrderIdAccepted => "order_id_accepted",
            Self::InvalidFormat => "invalid_format",
            Self::PhoneVerified => "phone_verified",
            Self::PhoneMultipleOrders => "phone_multiple_orders",
            Self::PhoneMismatch => "phone_mismatch",
            Self::PhoneMismatchLimit => "phone_mismatch_limit",
            Self::CategorySelected => "category_selected",
            Self::CategoryIneligible => "category_ineligible",
            Self::DetailsProvided => "details_provided",
            Self::Unrecognized => "unrecognized",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the runtime must do for a transition. Only `AnswerPolicyQuestion`
/// reaches the retriever and the generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueAction {
    Greet,
    PromptForOrderId,
    PromptForPhone,
    PromptForPhoneLookup,
    RepromptInvalidFormat,
    ConfirmVerification,
    ListCandidateOrders,
    ReportPhoneMismatch,
    ReportOrderStatus,
    PromptForCategory,
    ExplainCategoryIneligible,
    PromptForDetails,
    FileComplaint,
    CancelComplaint,
    CancelVerification,
    AnswerPolicyQuestion,
    DeclineOutOfScope,
    ResumeConversation,
    Deescalate,
    BlockSession,
    RepromptCurrentState,
}

impl DialogueAction {
    pub const ALL: [DialogueAction; 21] = [
        Self::Greet,
        Self::PromptForOrderId,
        Self::PromptForPhone,
        Self::PromptForPhoneLookup,
        Self::RepromptInvalidFormat,
        Self::ConfirmVerification,
        Self::ListCandidateOrders,
        Self::ReportPhoneMismatch,
        Self::ReportOrderStatus,
        Self::PromptForCategory,
        Self::ExplainCategoryIneligible,
        Self::PromptForDetails,
        Self::FileComplaint,
        Self::CancelComplaint,
        Self::CancelVerification,
        Self::AnswerPolicyQuestion,
        Self::DeclineOutOfScope,
        Self::ResumeConversation,
        Self::Deescalate,
        Self::BlockSession,
        Self::RepromptCurrentState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greet => "greet",
            Self::PromptForOrderId => "prompt_for_order_id",
            Self::PromptForPhone => "prompt_for_phone",
            Self::PromptForPhoneLookup => "prompt_for_phone_lookup",
            Self::RepromptInvalidFormat => "reprompt_invalid_format",
            Self::ConfirmVerification => "confirm_verification",
            Self::ListCandidateOrders => "list_candidate_orders",
            Self::ReportPhoneMismatch => "report_phone_mismatch",
            Self::ReportOrderStatus => "report_order_status",
            Self::PromptForCategory => "prompt_for_category",
            Self::ExplainCategoryIneligible => "explain_category_ineligible",
            Self::PromptForDetails => "prompt_for_details",
            Self::FileComplaint => "file_complaint",
            Self::CancelComplaint => "cancel_complaint",
            Self::CancelVerification => "cancel_verification",
            Self::AnswerPolicyQuestion => "answer_policy_question",
            Self::DeclineOutOfScope => "decline_out_of_scope",
            Self::ResumeConversation => "resume_conversation",
            Self::Deescalate => "deescalate",
            Self::BlockSession => "block_session",
            Self::RepromptCurrentState => "reprompt_current_state",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }

    pub fn invokes_generation(self) -> bool {
        matches!(self, Self::AnswerPolicyQuestion)
    }
}

impl fmt::Display for DialogueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the session the table may guard on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub verified: bool,
    pub resume_state: Option<DialogueState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogueState,
    pub to: DialogueState,
    pub input: InputKind,
    pub action: DialogueAction,
    /// `None` when no rule matched and the default re-prompt applied.
    pub rule_index: Option<usize>,
    pub resumed: bool,
}

impl TransitionOutcome {
    pub fn is_fallback(&self) -> bool {
        self.rule_index.is_none()
    }
}
