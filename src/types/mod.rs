//! Core types used throughout the N.E.A.R server.
//!
//! This module contains the common data structures used for:
//! - API requests and responses
//! - Questions flowing through the retrieval pipeline
//! - Retrieval candidates and their scores
//! - The answer envelope returned to callers
//! - Error handling

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============= Retrieval Modes =============

/// Retrieval breadth / latency trade-off selected per request.
///
/// The mode controls how many shards are queried, how many candidates are
/// kept, how wide the answer context is, and the overall wall-clock budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Smallest shard sample, tightest budget (1.5 s).
    UltraFast,
    /// Default trade-off (2.5 s budget).
    #[default]
    Fast,
    /// Wider shard sample and context (4 s budget).
    Balanced,
    /// Query every shard, widest context (8 s budget).
    Comprehensive,
}

impl FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ultra-fast" | "ultrafast" | "ultra" => Ok(Self::UltraFast),
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "comprehensive" | "full" => Ok(Self::Comprehensive),
            _ => Err(AppError::InvalidInput(format!(
                "Unknown mode: {}. Use: ultra-fast, fast, balanced, comprehensive",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UltraFast => "ultra-fast",
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Comprehensive => "comprehensive",
        };
        write!(f, "{}", name)
    }
}

// ============= Question =============

/// Immutable input bundle for a single request.
///
/// Created at the edge, flows read-only through the pipeline, and is
/// discarded when the response is flushed. The deadline is absolute; every
/// blocking stage derives its own timeout from it.
#[derive(Debug, Clone)]
pub struct Question {
    /// The user's question text (validated to 1..=2000 chars).
    pub text: String,
    /// Trace id attached to logs and error responses.
    pub trace_id: String,
    /// Absolute wall-clock deadline for the whole request.
    pub deadline: Instant,
    /// Resolved retrieval mode (never re-read from the environment mid-call).
    pub mode: Mode,
}

// ============= Retrieval Candidates =============

/// A document chunk returned by the vector store.
///
/// Produced inside the retrieval orchestrator, mutated once by the
/// relevance layer (`relevance`, `title`, `url`), then read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Document chunk id, unique within the corpus.
    pub doc_id: String,
    /// Collection (shard) the chunk came from.
    pub collection_id: String,
    /// Raw chunk text.
    pub content: String,
    /// Raw chunk metadata as stored.
    pub metadata: HashMap<String, String>,
    /// The store's native distance (cosine distance in [0, 2]).
    pub raw_distance: f32,
    /// Normalized similarity in [0, 1], strictly decreasing in distance.
    pub similarity: f32,
    /// Post-rerank composite score in [0, ~1.15].
    pub relevance: f32,
    /// Display title synthesized by the relevance layer.
    pub title: String,
    /// Source URL, if one could be derived.
    pub url: Option<String>,
}

impl Candidate {
    /// Build a candidate fresh from the store, before relevance enhancement.
    pub fn from_store(
        doc_id: String,
        collection_id: String,
        content: String,
        metadata: HashMap<String, String>,
        raw_distance: f32,
        similarity: f32,
    ) -> Self {
        Self {
            doc_id,
            collection_id,
            content,
            metadata,
            raw_distance,
            similarity,
            relevance: 0.0,
            title: String::new(),
            url: None,
        }
    }
}

// ============= Answer Envelope =============

/// A source attribution included in the answer envelope.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Source {
    /// Display title of the source document.
    pub title: String,
    /// Source URL, if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Vector similarity of the source to the question, in [0, 1].
    pub similarity: f32,
    /// Short excerpt of the source content (at most 240 chars).
    pub excerpt: String,
}

/// Maximum excerpt length carried in a [`Source`].
pub const SOURCE_EXCERPT_CHARS: usize = 240;

/// Per-stage wall-clock timings in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Timings {
    /// Time spent embedding the question.
    pub embed_ms: u64,
    /// Time spent in retrieval (fan-out and merge).
    pub search_ms: u64,
    /// Time spent in relevance scoring and metadata synthesis.
    pub rerank_ms: u64,
    /// Time spent in answer generation.
    pub generate_ms: u64,
    /// End-to-end time.
    pub total_ms: u64,
}

/// The typed response returned for every successful request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerEnvelope {
    /// The synthesized answer text.
    pub answer: String,
    /// Ranked source attributions (at most 5, in prompt order).
    pub sources: Vec<Source>,
    /// Answer confidence in [0, 1].
    pub confidence: f32,
    /// Per-stage timings.
    pub timings: Timings,
    /// Number of sources actually included in the prompt.
    pub used_sources_count: usize,
    /// Whether any stage ran out of budget or degraded.
    pub deadline_exceeded: bool,
}

// ============= API Request/Response Types =============

/// Request payload for the ask endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AskRequest {
    /// The question to answer (1..=2000 characters).
    pub question: String,
    /// Optional retrieval mode. Defaults to the configured mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Optional caller-supplied trace id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Error body returned for failed requests.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Short human-readable message. Never includes upstream secrets.
    pub error: String,
    /// Trace id for correlating logs.
    pub trace_id: String,
}

// ============= Error Types =============

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Input validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The embedding provider could not produce a vector.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The vector store is unreachable and no cached shard list exists.
    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    /// The chat provider failed or timed out.
    #[error("LLM unavailable: {0}")]
    LLMUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status code this error maps to at the edge.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::EmbeddingUnavailable(_)
            | AppError::VectorStoreUnavailable(_)
            | AppError::LLMUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string()
        });
        (status, axum::Json(body)).into_response()
    }
}

/// A specialized Result type for N.E.A.R operations.
pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// Tests
// ============================================================================
