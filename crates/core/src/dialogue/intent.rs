//! Keyword intent classification for English and Arabic support messages.
//!
//! English single words match whole tokens (with a plural `s`); phrases and
//! Arabic terms match as substrings, since Arabic attaches prefixes such as
//! `ال` and `و` directly to the word.

use serde::{Deserialize, Serialize};

use crate::domain::complaint::ComplaintCategory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Cancel,
    ForgotOrderId,
    Complaint,
    PolicyQuestion,
    OrderInquiry,
    Greeting,
    OffTopic,
    Unclear,
}

const CANCEL: &[&str] = &[
    "cancel", "never mind", "nevermind", "forget it", "start over", "stop",
    "الغاء", "إلغاء", "الغي", "ألغي", "بلاش", "خلص",
];

const FORGOT_ORDER_ID: &[&str] = &[
    "don't know", "dont know", "do not know", "no order id", "forgot", "i don't remember",
    "lost the order", "ما بعرف", "مش عارف", "ما عندي رقم", "نسيت رقم", "نسيت", "مش متذكر",
    "ما بتذكر", "ما معي رقم",
];

const COMPLAINT: &[&str] = &[
    "complaint", "complain", "problem", "issue", "manager", "supervisor", "escalate",
    "raise a complaint", "bad service", "not happy", "unhappy",
    "شكوى", "اشكي", "ارفع شكوى", "شكيت", "مشكلة", "مدير", "مسؤول", "الإدارة", "تصعيد",
    "بدي حد مسؤول", "مش مبسوط",
];

const POLICY: &[&str] = &[
    "policy", "policies", "refund", "return", "exchange", "warranty", "guarantee", "privacy",
    "terms", "conditions", "shipping", "fee", "payment", "cash on delivery", "working hours",
    "opening hours", "how long does delivery", "delivery time", "delivery fee",
    "سياسة", "سياسات", "استرجاع", "ارجاع", "إرجاع", "استبدال", "ضمان", "خصوصية", "شروط",
    "استرداد", "رسوم", "الدفع", "ساعات العمل",
];

const ORDER: &[&str] = &[
    "order", "track", "tracking", "delivery", "delivered", "shipment", "parcel", "package",
    "where is my", "status",
    "طلبي", "طلبيتي", "طلب", "رقم الطلب", "تتبع", "وين طلبي", "توصيل", "شحنة", "الطرد",
];

const GREETING: &[&str] = &[
    "hi", "hello", "hey", "good morning", "good afternoon", "good evening", "salam",
    "مرحبا", "السلام عليكم", "اهلا", "أهلا", "هلا", "صباح الخير", "مساء الخير",
];

const OFF_TOPIC: &[&str] = &[
    "weather", "football", "soccer", "joke", "recipe", "poem", "song", "lyrics", "movie",
    "politics", "election", "bitcoin", "crypto", "stock market", "homework", "capital of",
    "who won", "horoscope", "write code",
    "طقس", "الطقس", "نكتة", "مباراة", "وصفة", "اغنية", "أغنية", "فيلم", "انتخابات",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "how", "when", "where", "why", "which", "can", "could", "do", "does", "is", "are",
    "will", "ما", "ماذا", "كيف", "متى", "وين", "هل", "شو", "ليش", "كم", "ايش",
];

const CATEGORY_TERMS: &[(ComplaintCategory, &[&str])] = &[
    (
        ComplaintCategory::DamagedItem,
        &[
            "damage", "damaged", "broken", "defect", "defective", "crushed", "cracked", "opened",
            "leaking", "تلف", "مكسور", "خربان", "تالف", "مفتوح", "مشكلة بالمنتج",
        ],
    ),
    (
        ComplaintCategory::MissingItem,
        &["missing", "incomplete", "not included", "ناقص", "نقص", "مش موجود"],
    ),
    (
        ComplaintCategory::WrongItem,
        &[
            "wrong item", "wrong product", "wrong order", "wrong size", "wrong color",
            "not what i ordered", "وصلني غلط", "منتج غلط", "غلط بالطلب",
        ],
    ),
    (
        ComplaintCategory::LateDelivery,
        &[
            "late", "delay", "delayed", "slow", "not arrived", "hasn't arrived", "still waiting",
            "تأخير", "تاخير", "تاخر", "تأخر", "متأخر", "ما وصل",
        ],
    ),
    (
        ComplaintCategory::ServiceConduct,
        &[
            "rude", "behavior", "behaviour", "attitude", "unprofessional", "courier", "driver",
            "سوء", "تعامل", "مندوب", "سائق", "درايفر", "مش محترم", "وقح", "اسلوب", "خدمة سيئة",
        ],
    ),
    (
        ComplaintCategory::Escalation,
        &["manager", "supervisor", "escalate", "مدير", "مسؤول", "الإدارة", "تصعيد"],
    ),
    (ComplaintCategory::Other, &["other", "something else", "اخرى", "أخرى", "غير ذلك"]),
];

/// Upper bound on tokens for a message to count as a bare cancel request;
/// longer messages usually cancel something else ("cancel my order please").
const MAX_CANCEL_TOKENS: usize = 4;

#[derive(Clone, Debug, Default)]
pub struct IntentClassifier;

struct Prepared {
    lowered: String,
    tokens: Vec<String>,
}

impl Prepared {
    fn new(text: &str) -> Self {
        let lowered = text.trim().to_lowercase().replace('’', "'");
        let tokens = lowered
            .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect();
        Self { lowered, tokens }
    }

    fn has(&self, term: &str) -> bool {
        let single_ascii_word = term.is_ascii() && !term.contains(' ');
        if single_ascii_word {
            self.tokens.iter().any(|token| {
                token == term || token.strip_suffix('s').is_some_and(|stem| stem == term)
            })
        } else {
            self.lowered.contains(term)
        }
    }

    fn has_any(&self, terms: &[&str]) -> bool {
        terms.iter().any(|term| self.has(term))
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> Intent {
        let prepared = Prepared::new(text);
        if prepared.tokens.is_empty() {
            return Intent::Unclear;
        }

        if prepared.tokens.len() <= MAX_CANCEL_TOKENS && prepared.has_any(CANCEL) {
            return Intent::Cancel;
        }
        if prepared.has_any(FORGOT_ORDER_ID) {
            return Intent::ForgotOrderId;
        }
        if prepared.has_any(COMPLAINT) || self.detect_named_category(&prepared).is_some() {
            return Intent::Complaint;
        }
        if prepared.has_any(POLICY) {
            return Intent::PolicyQuestion;
        }
        if prepared.has_any(ORDER) {
            return Intent::OrderInquiry;
        }
        if prepared.has_any(OFF_TOPIC) {
            return Intent::OffTopic;
        }
        if prepared.has_any(GREETING) {
            return Intent::Greeting;
        }
        Intent::Unclear
    }

    /// Picks a complaint category from a menu number (`1`..`7`), a category
    /// name, or category keywords.
    pub fn detect_category(&self, text: &str) -> Option<ComplaintCategory> {
        let trimmed = text.trim().trim_end_matches(['.', ')']);
        if let Ok(choice) = trimmed.parse::<usize>() {
            return choice.checked_sub(1).and_then(|index| ComplaintCategory::ALL.get(index)).copied();
        }
        if let Some(category) = ComplaintCategory::parse(trimmed) {
            return Some(category);
        }

        let prepared = Prepared::new(text);
        self.detect_named_category(&prepared).or_else(|| {
            CATEGORY_TERMS
                .iter()
                .find(|(category, terms)| {
                    *category == ComplaintCategory::Other && prepared.has_any(terms)
                })
                .map(|(category, _)| *category)
        })
    }

    pub fn looks_like_question(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.ends_with('?') || trimmed.ends_with('؟') {
            return true;
        }
        let prepared = Prepared::new(trimmed);
        prepared.tokens.first().is_some_and(|first| QUESTION_WORDS.contains(&first.as_str()))
    }

    fn detect_named_category(&self, prepared: &Prepared) -> Option<ComplaintCategory> {
        CATEGORY_TERMS
            .iter()
            .filter(|(category, _)| *category != ComplaintCategory::Other)
            .find(|(_, terms)| prepared.has_any(terms))
            .map(|(category, _)| *category)
    }
}
