//! Grounded answers for policy questions.
//!
//! The prompt carries only retrieved chunk text and a bounded window of
//! recent turns. Answers are checked against the retrieved text before they
//! reach the customer; an empty retrieval never calls the model.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{info, warn};

use trustline_core::config::AppConfig;
use trustline_core::dialogue::{Language, Speaker, Turn};
use trustline_core::domain::knowledge::{ChunkId, DocumentId};
use trustline_core::knowledge::text::{content_terms, numbers};
use trustline_core::knowledge::ScoredChunk;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

const PROMPT_TEMPLATE_NAME: &str = "grounded_prompt.txt";
const PROMPT_TEMPLATE: &str = include_str!("../templates/grounded_prompt.txt");

const MIN_SHARED_TERMS: usize = 2;
const SHORT_ANSWER_TERMS: usize = 4;

const REFUSAL_MARKERS: &[&str] = &[
    "not available",
    "no information",
    "don't have information",
    "do not have information",
    "don't have verified information",
    "cannot find",
    "غير متوفرة",
    "غير متوفر",
    "لا تتوفر",
    "لا يوجد لدي معلومات",
];

pub fn no_grounded_information(language: Language) -> &'static str {
    match language {
        Language::En => {
            "I'm sorry, I don't have verified information about that in our policies. \
             Please contact our support team for help with this question."
        }
        Language::Ar => {
            "عذراً، لا تتوفر لدي معلومات موثقة حول هذا الموضوع في سياساتنا. \
             يرجى التواصل مع فريق الدعم للمساعدة في هذا السؤال."
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Clamped to one.
    pub max_retries: u32,
    pub history_window_turns: usize,
    pub max_prompt_chars: usize,
}

impl GenerationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_secs(config.llm.timeout_secs),
            max_retries: config.llm.max_retries.min(1),
            history_window_turns: config.dialogue.history_window_turns,
            max_prompt_chars: config.dialogue.max_prompt_chars,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What the generator may know about the conversation.
#[derive(Clone, Copy, Debug)]
pub struct ConversationContext<'a> {
    pub language: Language,
    pub history: &'a [Turn],
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub section_title: Option<String>,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// False for the fixed no-information answer.
    pub grounded: bool,
    pub attempts: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("text generation timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("text generation failed after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },
    #[error("answer was not grounded in the retrieved knowledge ({reason})")]
    Ungrounded { attempts: u32, reason: String },
    #[error("prompt template error: {0}")]
    Template(String),
}

#[derive(Serialize)]
struct PromptChunk<'a> {
    source: &'a str,
    section: Option<&'a str>,
    text: &'a str,
}

#[derive(Serialize)]
struct PromptTurn<'a> {
    speaker: &'static str,
    text: &'a str,
}

enum AttemptFailure {
    Timeout,
    Llm(LlmError),
    Ungrounded(String),
}

pub struct GroundedAnswerGenerator {
    llm: Arc<dyn LlmClient>,
    templates: Tera,
    settings: GenerationSettings,
}

impl GroundedAnswerGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, settings: GenerationSettings) -> Result<Self, GenerationError> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(PROMPT_TEMPLATE_NAME, PROMPT_TEMPLATE)
            .map_err(|error| GenerationError::Template(error.to_string()))?;
        Ok(Self { llm, templates, settings })
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub async fn generate(
        &self,
        query: &str,
        chunks: &[ScoredChunk],
        context: &ConversationContext<'_>,
    ) -> Result<GroundedAnswer, GenerationError> {
        if chunks.is_empty() {
            info!(event_name = "generation.no_grounding", "answered without calling the model");
            return Ok(GroundedAnswer {
                text: no_grounded_information(context.language).to_owned(),
                citations: Vec::new(),
                grounded: false,
                attempts: 0,
            });
        }

        let (prompt, used_chunks) = self.build_prompt(query, chunks, context)?;
        let request = CompletionRequest {
            system: system_prompt(context.language),
            prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let max_attempts = 1 + self.settings.max_retries.min(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let failure = match self.attempt(&request, query, used_chunks).await {
                Ok(text) => {
                    info!(
                        event_name = "generation.answered",
                        attempts,
                        chunks = used_chunks.len(),
                        "grounded answer produced"
                    );
                    return Ok(GroundedAnswer {
                        text,
                        citations: used_chunks.iter().map(citation).collect(),
                        grounded: true,
                        attempts,
                    });
                }
                Err(failure) => failure,
            };

            let retryable = match &failure {
                AttemptFailure::Timeout | AttemptFailure::Ungrounded(_) => true,
                AttemptFailure::Llm(error) => error.is_transient(),
            };
            if retryable && attempts < max_attempts {
                warn!(event_name = "generation.retrying", attempts, "retrying generation once");
                continue;
            }

            return Err(match failure {
                AttemptFailure::Timeout => GenerationError::Timeout { attempts },
                AttemptFailure::Llm(error) => {
                    GenerationError::Unavailable { attempts, message: error.to_string() }
                }
                AttemptFailure::Ungrounded(reason) => GenerationError::Ungrounded { attempts, reason },
            });
        }
    }

    async fn attempt(
        &self,
        request: &CompletionRequest,
        query: &str,
        chunks: &[ScoredChunk],
    ) -> Result<String, AttemptFailure> {
        let text = tokio::time::timeout(self.settings.timeout, self.llm.complete(request))
            .await
            .map_err(|_| AttemptFailure::Timeout)?
            .map_err(AttemptFailure::Llm)?;
        if let Err(reason) = check_grounding(&text, query, chunks) {
            warn!(event_name = "generation.ungrounded_rejected", reason = %reason, "answer rejected");
            return Err(AttemptFailure::Ungrounded(reason));
        }
        Ok(text)
    }

    /// Renders the prompt, evicting the oldest turns first and then the
    /// lowest-scored chunks until it fits. At least one chunk always stays.
    fn build_prompt<'c>(
        &self,
        query: &str,
        chunks: &'c [ScoredChunk],
        context: &ConversationContext<'_>,
    ) -> Result<(String, &'c [ScoredChunk]), GenerationError> {
        let window = self.settings.history_window_turns;
        let mut history = &context.history[context.history.len().saturating_sub(window)..];
        let mut used = chunks;

        loop {
            let prompt = self.render(query, used, history, context.language)?;
            if prompt.chars().count() <= self.settings.max_prompt_chars {
                return Ok((prompt, used));
            }
            if !history.is_empty() {
                history = &history[1..];
            } else if used.len() > 1 {
                used = &used[..used.len() - 1];
            } else {
                return Ok((prompt, used));
            }
        }
    }

    fn render(
        &self,
        query: &str,
        chunks: &[ScoredChunk],
        history: &[Turn],
        language: Language,
    ) -> Result<String, GenerationError> {
        let prompt_chunks: Vec<PromptChunk<'_>> = chunks
            .iter()
            .map(|scored| PromptChunk {
                source: &scored.chunk.document_id.0,
                section: scored.chunk.metadata.section_title.as_deref(),
                text: &scored.chunk.text,
            })
            .collect();
        let turns: Vec<PromptTurn<'_>> = history
            .iter()
            .map(|turn| PromptTurn {
                speaker: match turn.speaker {
                    Speaker::Customer => "Customer",
                    Speaker::Assistant => "Assistant",
                },
                text: &turn.text,
            })
            .collect();

        let mut context = Context::new();
        context.insert("chunks", &prompt_chunks);
        context.insert("turns", &turns);
        context.insert("question", query.trim());
        context.insert("language", language.display_name());
        self.templates
            .render(PROMPT_TEMPLATE_NAME, &context)
            .map_err(|error| GenerationError::Template(error.to_string()))
    }
}

fn system_prompt(language: Language) -> String {
    format!(
        "You are a customer support assistant for an online store. Answer policy and FAQ \
         questions using only the KNOWLEDGE section of the prompt. Never invent policies, \
         prices, durations or order details. Never ask for personal data other than an order \
         id or phone number. Reply only in {}, in at most a few sentences.",
        language.display_name()
    )
}

fn citation(scored: &ScoredChunk) -> Citation {
    Citation {
        chunk_id: scored.chunk.id.clone(),
        document_id: scored.chunk.document_id.clone(),
        section_title: scored.chunk.metadata.section_title.clone(),
        score: scored.score,
    }
}

fn is_refusal(answer: &str) -> bool {
    let lowered = answer.to_lowercase();
    REFUSAL_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Content terms a plain refusal is made of: the markers and both fixed
/// "no grounded information" answers.
fn refusal_vocabulary() -> BTreeSet<String> {
    let mut vocabulary = BTreeSet::new();
    for marker in REFUSAL_MARKERS {
        vocabulary.extend(content_terms(marker));
    }
    for language in [Language::En, Language::Ar] {
        vocabulary.extend(content_terms(no_grounded_information(language)));
    }
    vocabulary
}

/// A refusal that states nothing: no numbers, and every content term is
/// either refusal wording or echoes the question's topic.
fn is_plain_refusal(answer: &str, query: &str) -> bool {
    if !is_refusal(answer) || !numbers(answer).is_empty() {
        return false;
    }
    let vocabulary = refusal_vocabulary();
    let topic = content_terms(query);
    content_terms(answer)
        .iter()
        .all(|term| vocabulary.contains(term) || topic.contains(term))
}

/// Lexical hallucination guard: the answer must share content terms with the
/// retrieved text, and every number it states must appear in a retrieved
/// chunk. A plain refusal passes; a refusal that goes on to make claims is
/// checked like any other answer.
pub fn check_grounding(answer: &str, query: &str, chunks: &[ScoredChunk]) -> Result<(), String> {
    if answer.trim().is_empty() {
        return Err("empty answer".to_owned());
    }
    if is_plain_refusal(answer, query) {
        return Ok(());
    }

    let mut known_terms = BTreeSet::new();
    let mut known_numbers = BTreeSet::new();
    for scored in chunks {
        known_terms.extend(content_terms(&scored.chunk.text));
        known_numbers.extend(numbers(&scored.chunk.text));
    }

    let answer_terms = content_terms(answer);
    let shared = answer_terms.intersection(&known_terms).count();
    let required = if answer_terms.len() <= SHORT_ANSWER_TERMS { 1 } else { MIN_SHARED_TERMS };
    if shared < required {
        return Err(format!("{shared} shared content term(s), need {required}"));
    }

    if let Some(unknown) = numbers(answer).into_iter().find(|number| !known_numbers.contains(number)) {
        return Err(format!("number {unknown} does not appear in the knowledge"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use trustline_core::dialogue::{Language, Speaker, Turn};
    use trustline_core::domain::knowledge::{ChunkId, ChunkMetadata, DocumentId, KnowledgeChunk};
    use trustline_core::knowledge::ScoredChunk;

    use super::{
        check_grounding, no_grounded_information, ConversationContext, GenerationError,
        GenerationSettings, GroundedAnswerGenerator,
    };
    use crate::llm::{LlmError, ScriptedLlmClient};

    const REFUND_TEXT: &str = "Refunds are issued within 14 days of delivery for unused items \
                               in their original packaging.";

    fn refund_chunk() -> ScoredChunk {
        ScoredChunk {
            chunk: KnowledgeChunk {
                id: ChunkId("refund-policy@g1#0".to_owned()),
                document_id: DocumentId("refund-policy".to_owned()),
                text: REFUND_TEXT.to_owned(),
                embedding: vec![1.0],
                metadata: ChunkMetadata {
                    section_title: Some("Refunds".to_owned()),
                    document_version: "v1".to_owned(),
                    indexed_at: Utc::now(),
                    ordinal: 0,
                },
            },
            score: 0.82,
        }
    }

    fn settings() -> GenerationSettings {
        GenerationSettings { timeout: Duration::from_millis(200), ..GenerationSettings::default() }
    }

    fn english(history: &[Turn]) -> ConversationContext<'_> {
        ConversationContext { language: Language::En, history }
    }

    #[tokio::test]
    async fn empty_retrieval_never_calls_the_model() {
        let llm = Arc::new(ScriptedLlmClient::replying(["should not be used"]));
        let generator = GroundedAnswerGenerator::new(llm.clone(), settings()).expect("generator");

        let answer = generator.generate("What about crypto?", &[], &english(&[])).await.expect("answer");
        assert!(!answer.grounded);
        assert_eq!(answer.text, no_grounded_information(Language::En));
        assert_eq!(llm.call_count(), 0);

        let arabic = ConversationContext { language: Language::Ar, history: &[] };
        let answer = generator.generate("سؤال", &[], &arabic).await.expect("answer");
        assert_eq!(answer.text, no_grounded_information(Language::Ar));
    }

    #[tokio::test]
    async fn grounded_answer_cites_the_retrieved_chunk() {
        let llm = Arc::new(ScriptedLlmClient::replying([
            "You can get a refund within 14 days of delivery if the items are unused.",
        ]));
        let generator = GroundedAnswerGenerator::new(llm.clone(), settings()).expect("generator");

        let answer = generator
            .generate("What is your refund policy?", &[refund_chunk()], &english(&[]))
            .await
            .expect("grounded answer");
        assert!(answer.grounded);
        assert_eq!(answer.attempts, 1);
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].document_id.0, "refund-policy");

        let request = &llm.requests()[0];
        assert!(request.prompt.contains(REFUND_TEXT));
        assert!(request.prompt.contains("What is your refund policy?"));
        assert!(request.system.contains("English"));
    }

    #[tokio::test]
    async fn invented_claims_are_retried_once_then_rejected() {
        let llm = Arc::new(ScriptedLlmClient::replying([
            "Refunds are issued within 30 days of delivery.",
            "Our loyalty programme gives members free shipping worldwide forever.",
        ]));
        let generator = GroundedAnswerGenerator::new(llm.clone(), settings()).expect("generator");

        let error = generator
            .generate("What is your refund policy?", &[refund_chunk()], &english(&[]))
            .await
            .expect_err("both answers ungrounded");
        assert!(matches!(error, GenerationError::Ungrounded { attempts: 2, .. }));
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_fatal_is_not() {
        let llm = Arc::new(ScriptedLlmClient::new([
            Err(LlmError::Transient("overloaded".to_owned())),
            Ok("Refunds are issued within 14 days of delivery.".to_owned()),
        ]));
        let generator = GroundedAnswerGenerator::new(llm.clone(), settings()).expect("generator");
        let answer = generator
            .generate("refund?", &[refund_chunk()], &english(&[]))
            .await
            .expect("second attempt succeeds");
        assert_eq!(answer.attempts, 2);

        let llm = Arc::new(ScriptedLlmClient::new([Err(LlmError::Fatal("bad key".to_owned()))]));
        let generator = GroundedAnswerGenerator::new(llm.clone(), settings()).expect("generator");
        let error = generator
            .generate("refund?", &[refund_chunk()], &english(&[]))
            .await
            .expect_err("fatal");
        assert!(matches!(error, GenerationError::Unavailable { attempts: 1, .. }));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_model_times_out_after_one_retry() {
        let llm = Arc::new(
            ScriptedLlmClient::replying(["late", "late"]).with_delay(Duration::from_millis(500)),
        );
        let generator = GroundedAnswerGenerator::new(
            llm.clone(),
            GenerationSettings { timeout: Duration::from_millis(20), ..GenerationSettings::default() },
        )
        .expect("generator");
        let error = generator
            .generate("refund?", &[refund_chunk()], &english(&[]))
            .await
            .expect_err("timeout");
        assert_eq!(error, GenerationError::Timeout { attempts: 2 });
    }

    #[tokio::test]
    async fn oldest_turns_are_dropped_to_fit_the_prompt_budget() {
        let now = Utc::now();
        let history: Vec<Turn> = (0..6)
            .map(|index| Turn {
                speaker: if index % 2 == 0 { Speaker::Customer } else { Speaker::Assistant },
                text: format!("turn-{index} {}", "x".repeat(80)),
                at: now,
            })
            .collect();
        let llm = Arc::new(ScriptedLlmClient::replying([
            "Refunds are issued within 14 days of delivery.",
        ]));
        let generator = GroundedAnswerGenerator::new(
            llm.clone(),
            GenerationSettings {
                history_window_turns: 4,
                max_prompt_chars: 650,
                ..settings()
            },
        )
        .expect("generator");
        generator
            .generate("refund?", &[refund_chunk()], &english(&history))
            .await
            .expect("answer");

        let prompt = &llm.requests()[0].prompt;
        assert!(prompt.chars().count() <= 650);
        assert!(!prompt.contains("turn-0"), "outside the window");
        assert!(!prompt.contains("turn-1"), "outside the window");
        assert!(prompt.contains("turn-5"), "newest turn survives");
        assert!(prompt.contains(REFUND_TEXT));
    }

    #[test]
    fn plain_refusals_pass_the_guard() {
        let chunks = [refund_chunk()];
        assert!(check_grounding("That information is not available.", "q", &chunks).is_ok());
        assert!(check_grounding(
            "Sorry, information about crypto payments is not available.",
            "Do you accept crypto payments?",
            &chunks,
        )
        .is_ok());
        assert!(check_grounding(no_grounded_information(Language::En), "q", &chunks).is_ok());
        assert!(check_grounding("Refunds take 7 days.", "refund?", &chunks).is_err());
    }

    #[test]
    fn refusal_wording_does_not_excuse_invented_claims() {
        let chunks = [refund_chunk()];
        let error = check_grounding(
            "Store credit is not available, but refunds are paid in cash within 90 days \
             and we cover return shipping worldwide.",
            "What is your refund policy?",
            &chunks,
        )
        .expect_err("claims after a refusal are checked");
        assert!(error.contains("90"), "{error}");
    }

    #[test]
    fn numbers_from_the_question_are_not_grounding() {
        let chunks = [refund_chunk()];
        let error = check_grounding(
            "Yes, refunds are issued within 60 days of delivery.",
            "Can I get a refund within 60 days?",
            &chunks,
        )
        .expect_err("the question's number is not in the knowledge");
        assert!(error.contains("60"), "{error}");
        assert!(check_grounding(
            "No, refunds are issued within 14 days of delivery.",
            "Can I get a refund within 60 days?",
            &chunks,
        )
        .is_ok());
    }
}
