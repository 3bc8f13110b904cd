//! Relevance re-ranking.
//!
//! Refines vector similarity with cheap lexical signals before prompt
//! assembly:
//!
//! ```text
//! relevance = similarity
//!           + 0.10 * title_match
//!           + 0.05 * content_match
//!           + 0.05 * exact_phrase_match
//! ```
//!
//! Ranking is a pure function of candidate contents: the same candidate set
//! in any order produces the same output ordering. Ties are broken by
//! similarity descending, then doc id ascending.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::Candidate;

/// Boost when a non-stopword query token appears in the title.
const TITLE_MATCH_WEIGHT: f32 = 0.10;
/// Boost when a query token appears early in the content.
const CONTENT_MATCH_WEIGHT: f32 = 0.05;
/// Boost when the whole query phrase appears in the content.
const EXACT_PHRASE_WEIGHT: f32 = 0.05;

/// Candidates below this similarity are dropped.
const SIMILARITY_FLOOR: f32 = 0.15;
/// Minimum candidates preserved even when the floor would drop them.
const GRACEFUL_FLOOR: usize = 3;

/// How much of the content the lexical scan looks at.
const CONTENT_SCAN_CHARS: usize = 1000;

/// A phrase must have at least this many tokens to count as an exact match.
const MIN_PHRASE_TOKENS: usize = 3;

/// Standard English closed-class stopwords, fixed for reproducible scores.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "how",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "their", "this", "to", "was", "what",
    "when", "where", "which", "who", "will", "with",
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty() && s.len() > 1)
        .map(String::from)
        .collect()
}

/// Non-stopword query tokens used by the lexical signals.
pub fn query_terms(query: &str) -> Vec<String> {
    tokenize(query)
        .into_iter()
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

/// Compute the relevance score for every candidate in place.
pub fn score(query: &str, candidates: &mut [Candidate]) {
    let terms = query_terms(query);
    let phrase = query.trim().to_lowercase();
    let phrase_applies = tokenize(&phrase).len() >= MIN_PHRASE_TOKENS;

    for candidate in candidates.iter_mut() {
        let title_tokens: HashSet<String> = tokenize(&candidate.title).into_iter().collect();
        let prefix: String = candidate.content.chars().take(CONTENT_SCAN_CHARS).collect();
        let prefix_tokens: HashSet<String> = tokenize(&prefix).into_iter().collect();

        let title_match = terms.iter().any(|t| title_tokens.contains(t));
        let content_match = terms.iter().any(|t| prefix_tokens.contains(t));
        let phrase_match = phrase_applies && candidate.content.to_lowercase().contains(&phrase);

        candidate.relevance = candidate.similarity
            + if title_match { TITLE_MATCH_WEIGHT } else { 0.0 }
            + if content_match { CONTENT_MATCH_WEIGHT } else { 0.0 }
            + if phrase_match { EXACT_PHRASE_WEIGHT } else { 0.0 };
    }
}

/// Drop weak candidates, keeping answerability.
///
/// Candidates below the similarity floor are dropped; if fewer than three
/// survive, the highest-similarity dropped candidates are reintroduced to
/// bring the total back up to three (or as many as exist).
pub fn filter(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let (mut kept, mut dropped): (Vec<Candidate>, Vec<Candidate>) = candidates
        .into_iter()
        .partition(|c| c.similarity >= SIMILARITY_FLOOR);

    if kept.len() < GRACEFUL_FLOOR && !dropped.is_empty() {
        dropped.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        let needed = GRACEFUL_FLOOR - kept.len();
        kept.extend(dropped.into_iter().take(needed));
    }

    kept
}

fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.similarity.total_cmp(&a.similarity))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Score, filter, and sort candidates for prompt assembly.
///
/// Titles must already be synthesized (see [`crate::rag::metadata`]) since
/// the title-match signal reads them.
pub fn rank(query: &str, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    score(query, &mut candidates);
    let mut ranked = filter(candidates);
    ranked.sort_by(rank_order);
    ranked
}

// ============================================================================
// Tests
// ============================================================================
