//! Answer Generator
//!
//! Packages the top-ranked candidates into a deadline-aware, length-bounded
//! prompt, calls the chat model, and post-processes the output into the
//! answer envelope fields.
//!
//! The request timeout is derived from the question deadline (minus a
//! 200 ms safety margin, never below 1.5 s). A single retry happens only
//! when at least one second of budget remains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::llm::client::{ChatClient, ChatMessage, ChatOptions};
use crate::types::{AppError, Candidate, Mode, Question, Result, Source, SOURCE_EXCERPT_CHARS};

/// Fixed system instruction sent with every generation request.
pub const SYSTEM_PROMPT: &str = "You answer questions about Northeastern University using ONLY \
the provided sources. Cite sources by [index]. If the sources do not contain the answer, say so \
plainly. Do not fabricate URLs, programs, or facts.";

/// Conservative character cap on the assembled prompt (~3,500 tokens).
pub const PROMPT_CHAR_BUDGET: usize = 12_000;

/// Answer returned without a model call when no sources survived ranking.
pub const NO_SOURCES_ANSWER: &str =
    "The available sources do not contain information about this question.";

/// Maximum sources attributed in the envelope.
const MAX_ENVELOPE_SOURCES: usize = 5;

/// Margin reserved for post-processing and response flush.
const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_millis(200);

/// Floor on the model request timeout.
const MIN_LLM_TIMEOUT: Duration = Duration::from_millis(1500);

/// Budget that must remain for the single retry to be worth it.
const RETRY_MIN_REMAINING: Duration = Duration::from_millis(1000);

/// Outputs shorter than this are treated as non-answers.
const MIN_ANSWER_CHARS: usize = 20;

/// Confidence assigned to degraded or "no information" answers.
const DEGRADED_CONFIDENCE: f32 = 0.2;

const REFUSAL_PREFIXES: &[&str] = &[
    "i'm sorry, but ",
    "i apologize, but ",
    "as an ai language model, ",
    "as an ai assistant, ",
];

const NO_INFO_MARKERS: &[&str] = &[
    "do not contain",
    "does not contain",
    "don't contain",
    "no information",
    "cannot find information",
];

// ============================================================================
// Per-Mode Context Width
// ============================================================================

/// How much context a mode feeds to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    /// Candidates included in the prompt.
    pub context_docs: usize,
    /// Excerpt length per candidate.
    pub excerpt_chars: usize,
    /// Maximum output tokens.
    pub max_tokens: u32,
}

impl GenerationParams {
    /// The context-width table for a mode.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::UltraFast => Self {
                context_docs: 3,
                excerpt_chars: 250,
                max_tokens: 300,
            },
            Mode::Fast => Self {
                context_docs: 5,
                excerpt_chars: 350,
                max_tokens: 300,
            },
            Mode::Balanced => Self {
                context_docs: 8,
                excerpt_chars: 500,
                max_tokens: 500,
            },
            Mode::Comprehensive => Self {
                context_docs: 12,
                excerpt_chars: 500,
                max_tokens: 500,
            },
        }
    }
}

// ============================================================================
// Prompt Assembly
// ============================================================================

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn context_block(index: usize, candidate: &Candidate, excerpt_chars: usize) -> String {
    let mut block = format!("[{}] {}\n", index, candidate.title);
    if let Some(url) = &candidate.url {
        block.push_str(&format!("URL: {}\n", url));
    }
    block.push_str(&format!(
        "Excerpt: {}\n",
        truncate_chars(candidate.content.trim(), excerpt_chars)
    ));
    block
}

/// Build the context section of the prompt and record which candidates made
/// it in. If the character budget overflows, the overflowing candidate's
/// excerpt is truncated to fit and everything after it is dropped.
fn assemble_context<'a>(
    ranked: &'a [Candidate],
    params: &GenerationParams,
) -> (String, Vec<&'a Candidate>) {
    let mut context = String::new();
    let mut included = Vec::new();

    for (i, candidate) in ranked.iter().take(params.context_docs).enumerate() {
        let block = context_block(i + 1, candidate, params.excerpt_chars);
        if context.len() + block.len() > PROMPT_CHAR_BUDGET {
            let room = PROMPT_CHAR_BUDGET.saturating_sub(context.len());
            // A header-only block is useless; only keep the candidate if a
            // meaningful slice of its excerpt still fits.
            let header = context_block(i + 1, candidate, 0);
            if room > header.len() + 40 {
                let excerpt_room = room - header.len();
                context.push_str(&context_block(i + 1, candidate, excerpt_room));
                included.push(candidate);
            }
            break;
        }
        context.push_str(&block);
        context.push('\n');
        included.push(candidate);
    }

    (context, included)
}

fn user_prompt(question_text: &str, context: &str) -> String {
    format!(
        "Sources:\n\n{}\nQuestion: {}\n\nAnswer the question using only the sources above, citing them by index.",
        context, question_text
    )
}

// ============================================================================
// Post-processing
// ============================================================================

fn strip_refusal_preamble(answer: &str) -> String {
    let trimmed = answer.trim();
    let lower = trimmed.to_lowercase();
    for prefix in REFUSAL_PREFIXES {
        if lower.starts_with(prefix) {
            return trimmed[prefix.len()..].trim_start().to_string();
        }
    }
    trimmed.to_string()
}

fn looks_like_no_info(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    NO_INFO_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn confidence_for(answer: &str, ranked: &[Candidate]) -> f32 {
    if answer.chars().count() < MIN_ANSWER_CHARS || looks_like_no_info(answer) {
        return DEGRADED_CONFIDENCE;
    }
    let top: Vec<f32> = ranked.iter().take(3).map(|c| c.relevance).collect();
    if top.is_empty() {
        return DEGRADED_CONFIDENCE;
    }
    let mean = top.iter().sum::<f32>() / top.len() as f32;
    mean.min(1.0)
}

/// Compute the model request timeout from the question deadline.
fn llm_timeout(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .saturating_sub(DEADLINE_SAFETY_MARGIN)
        .max(MIN_LLM_TIMEOUT)
}

// ============================================================================
// Generator
// ============================================================================

/// Result of one generation pass.
#[derive(Debug)]
pub struct GenerationOutcome {
    /// Post-processed answer text.
    pub answer: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Source attributions, in prompt order (at most 5).
    pub sources: Vec<Source>,
    /// Candidates actually included in the prompt.
    pub used_sources_count: usize,
}

/// Deadline-aware answer generation over a chat model.
pub struct AnswerGenerator {
    chat: Arc<dyn ChatClient>,
    temperature: f32,
    max_tokens_ceiling: u32,
    upstream: Arc<Semaphore>,
}

impl AnswerGenerator {
    /// Create a generator.
    ///
    /// `max_tokens_ceiling` caps the per-mode output token budget; it comes
    /// from configuration.
    pub fn new(
        chat: Arc<dyn ChatClient>,
        temperature: f32,
        max_tokens_ceiling: u32,
        upstream: Arc<Semaphore>,
    ) -> Self {
        Self {
            chat,
            temperature,
            max_tokens_ceiling,
            upstream,
        }
    }

    /// Generate an answer from ranked candidates.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::LLMUnavailable`] when the chat provider fails
    /// and no retry budget remains; no fallback text is generated.
    pub async fn generate(
        &self,
        question: &Question,
        ranked: &[Candidate],
    ) -> Result<GenerationOutcome> {
        if ranked.is_empty() {
            return Ok(GenerationOutcome {
                answer: NO_SOURCES_ANSWER.to_string(),
                confidence: DEGRADED_CONFIDENCE,
                sources: Vec::new(),
                used_sources_count: 0,
            });
        }

        let params = GenerationParams::for_mode(question.mode);
        let (context, included) = assemble_context(ranked, &params);
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(&question.text, &context)),
        ];

        let sources: Vec<Source> = included
            .iter()
            .take(MAX_ENVELOPE_SOURCES)
            .map(|candidate| Source {
                title: candidate.title.clone(),
                url: candidate.url.clone(),
                similarity: candidate.similarity,
                excerpt: truncate_chars(candidate.content.trim(), SOURCE_EXCERPT_CHARS),
            })
            .collect();

        let raw = self.call_with_retry(question, &messages, &params).await?;
        let answer = strip_refusal_preamble(&raw);
        let confidence = confidence_for(&answer, ranked);

        Ok(GenerationOutcome {
            answer,
            confidence,
            sources,
            used_sources_count: included.len(),
        })
    }

    async fn call_with_retry(
        &self,
        question: &Question,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let options = ChatOptions {
            temperature: self.temperature,
            max_tokens: params.max_tokens.min(self.max_tokens_ceiling),
            timeout: llm_timeout(question.deadline),
        };

        let first_err = {
            let _permit = self.upstream.acquire().await.map_err(|_| {
                AppError::Internal("upstream request limiter closed".to_string())
            })?;
            match self.chat.chat(messages, &options).await {
                Ok(answer) => return Ok(answer),
                Err(err) => err,
            }
        };

        let remaining = question.deadline.saturating_duration_since(Instant::now());
        if remaining < RETRY_MIN_REMAINING {
            return Err(first_err);
        }

        tracing::warn!(
            trace_id = %question.trace_id,
            error = %first_err,
            "chat call failed, retrying once"
        );
        let retry_options = ChatOptions {
            timeout: llm_timeout(question.deadline),
            ..options
        };
        let _permit = self.upstream.acquire().await.map_err(|_| {
            AppError::Internal("upstream request limiter closed".to_string())
        })?;
        self.chat.chat(messages, &retry_options).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedChat {
        response: String,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl ScriptedChat {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
                fail_first: 0,
            }
        }

        fn failing_first(response: &str, fail_first: usize) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(AppError::LLMUnavailable("transient".into()));
            }
            Ok(self.response.clone())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn ranked_candidate(doc_id: &str, relevance: f32) -> Candidate {
        let mut c = Candidate::from_store(
            doc_id.to_string(),
            "col".to_string(),
            format!("Content about co-op programs for {}", doc_id),
            HashMap::new(),
            0.3,
            0.85,
        );
        c.title = format!("Title {}", doc_id);
        c.url = Some(format!("https://northeastern.edu/{}", doc_id));
        c.relevance = relevance;
        c
    }

    fn question(mode: Mode) -> Question {
        Question {
            text: "What co-op programs exist?".to_string(),
            trace_id: "test-trace".to_string(),
            deadline: Instant::now() + Duration::from_secs(5),
            mode,
        }
    }

    fn generator(chat: Arc<dyn ChatClient>) -> AnswerGenerator {
        AnswerGenerator::new(chat, 0.2, 500, Arc::new(Semaphore::new(4)))
    }

    #[test]
    fn test_generation_params_table() {
        assert_eq!(GenerationParams::for_mode(Mode::UltraFast).context_docs, 3);
        assert_eq!(GenerationParams::for_mode(Mode::Fast).excerpt_chars, 350);
        assert_eq!(GenerationParams::for_mode(Mode::Balanced).max_tokens, 500);
        assert_eq!(
            GenerationParams::for_mode(Mode::Comprehensive).context_docs,
            12
        );
    }

    #[test]
    fn test_context_block_format() {
        let candidate = ranked_candidate("a", 0.9);
        let block = context_block(1, &candidate, 50);
        assert!(block.starts_with("[1] Title a\n"));
        assert!(block.contains("URL: https://northeastern.edu/a\n"));
        assert!(block.contains("Excerpt: "));
    }

    #[test]
    fn test_assemble_context_respects_doc_count() {
        let ranked: Vec<Candidate> = (0..10)
            .map(|i| ranked_candidate(&format!("d{}", i), 0.9))
            .collect();
        let params = GenerationParams::for_mode(Mode::UltraFast);
        let (_, included) = assemble_context(&ranked, &params);
        assert_eq!(included.len(), 3);
    }

    #[test]
    fn test_assemble_context_truncates_on_overflow() {
        let mut ranked = Vec::new();
        for i in 0..12 {
            let mut c = ranked_candidate(&format!("d{}", i), 0.9);
            c.content = "x".repeat(5000);
            ranked.push(c);
        }
        let params = GenerationParams::for_mode(Mode::Comprehensive);
        let (context, included) = assemble_context(&ranked, &params);
        assert!(context.len() <= PROMPT_CHAR_BUDGET);
        assert!(included.len() < 12);
        assert!(!included.is_empty());
    }

    #[test]
    fn test_strip_refusal_preamble() {
        assert_eq!(
            strip_refusal_preamble("I'm sorry, but the answer is 42."),
            "the answer is 42."
        );
        assert_eq!(strip_refusal_preamble("Plain answer."), "Plain answer.");
    }

    #[test]
    fn test_confidence_short_answer_degraded() {
        let ranked = vec![ranked_candidate("a", 0.9)];
        assert_eq!(confidence_for("Too short", &ranked), DEGRADED_CONFIDENCE);
    }

    #[test]
    fn test_confidence_no_info_degraded() {
        let ranked = vec![ranked_candidate("a", 0.9)];
        let answer = "The provided sources do not contain the answer to this question.";
        assert_eq!(confidence_for(answer, &ranked), DEGRADED_CONFIDENCE);
    }

    #[test]
    fn test_confidence_mean_of_top_three() {
        let ranked = vec![
            ranked_candidate("a", 0.9),
            ranked_candidate("b", 0.6),
            ranked_candidate("c", 0.3),
            ranked_candidate("d", 0.0),
        ];
        let answer = "Northeastern offers many co-op programs across colleges [1].";
        let confidence = confidence_for(answer, &ranked);
        assert!((confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_capped_at_one() {
        let ranked = vec![ranked_candidate("a", 1.4), ranked_candidate("b", 1.2)];
        let answer = "A long enough answer that cites its sources properly [1].";
        assert!((confidence_for(answer, &ranked) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_llm_timeout_floor() {
        // Deadline already passed: the floor still applies.
        let timeout = llm_timeout(Instant::now());
        assert_eq!(timeout, MIN_LLM_TIMEOUT);

        let generous = llm_timeout(Instant::now() + Duration::from_secs(10));
        assert!(generous > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_generate_empty_candidates_short_circuits() {
        let chat = Arc::new(ScriptedChat::new("unused"));
        let generator = generator(chat.clone());
        let outcome = generator.generate(&question(Mode::Fast), &[]).await.unwrap();

        assert_eq!(outcome.answer, NO_SOURCES_ANSWER);
        assert_eq!(outcome.confidence, DEGRADED_CONFIDENCE);
        assert_eq!(outcome.used_sources_count, 0);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_produces_sources_in_prompt_order() {
        let chat = Arc::new(ScriptedChat::new(
            "Northeastern offers over 100 co-op programs [1][2].",
        ));
        let generator = generator(chat);
        let ranked: Vec<Candidate> = (0..8)
            .map(|i| ranked_candidate(&format!("d{}", i), 0.9 - i as f32 * 0.05))
            .collect();

        let outcome = generator
            .generate(&question(Mode::Fast), &ranked)
            .await
            .unwrap();

        assert_eq!(outcome.used_sources_count, 5);
        assert_eq!(outcome.sources.len(), 5);
        assert_eq!(outcome.sources[0].title, "Title d0");
        assert!(outcome.sources[0].excerpt.chars().count() <= SOURCE_EXCERPT_CHARS);
        assert!(outcome.confidence > DEGRADED_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_generate_envelope_sources_capped_at_five() {
        let chat = Arc::new(ScriptedChat::new(
            "A sufficiently long answer citing sources [1][2][3].",
        ));
        let generator = generator(chat);
        let ranked: Vec<Candidate> = (0..12)
            .map(|i| ranked_candidate(&format!("d{}", i), 0.9))
            .collect();

        let outcome = generator
            .generate(&question(Mode::Comprehensive), &ranked)
            .await
            .unwrap();

        assert_eq!(outcome.used_sources_count, 12);
        assert_eq!(outcome.sources.len(), 5);
    }

    #[tokio::test]
    async fn test_generate_retries_once_with_budget() {
        let chat = Arc::new(ScriptedChat::failing_first(
            "Recovered answer with enough length to count [1].",
            1,
        ));
        let generator = generator(chat.clone());
        let ranked = vec![ranked_candidate("a", 0.9)];

        let outcome = generator
            .generate(&question(Mode::Fast), &ranked)
            .await
            .unwrap();

        assert!(outcome.answer.starts_with("Recovered"));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generate_no_retry_without_budget() {
        let chat = Arc::new(ScriptedChat::failing_first("unused", 10));
        let generator = generator(chat.clone());
        let ranked = vec![ranked_candidate("a", 0.9)];
        let question = Question {
            // Deadline in the immediate past: no retry budget.
            deadline: Instant::now(),
            ..question(Mode::Fast)
        };

        let err = generator.generate(&question, &ranked).await.unwrap_err();
        assert!(matches!(err, AppError::LLMUnavailable(_)));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }
}
