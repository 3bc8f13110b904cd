//! # N.E.A.R - Northeastern Engine for Answer Retrieval
//!
//! A deadline-aware retrieval-augmented question-answering server over
//! ~80,000 chunked Northeastern University web documents stored as dense
//! vector embeddings.
//!
//! ## Overview
//!
//! A question comes in, gets embedded (with caching), is matched against
//! the corpus - either one unified collection or thousands of shard
//! collections queried through a concurrent, cancellable fan-out - and the
//! merged candidates are re-ranked with lexical signals before a chat model
//! synthesizes an answer with source attributions. Every stage derives its
//! timeout from a single per-request deadline, so answers land in seconds
//! even when parts of the store misbehave.
//!
//! N.E.A.R can be used in two ways:
//!
//! 1. **As a standalone server** - run the `near-server` binary
//! 2. **As a library** - construct a [`rag::QueryEngine`] with your own
//!    collaborators
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use near::rag::{EngineConfig, QueryEngine, HttpEmbeddingClient};
//! use near::db::ChromaStore;
//! use near::llm::OpenAiCompatClient;
//! use std::sync::Arc;
//!
//! let engine = QueryEngine::new(
//!     EngineConfig::from_config(&config),
//!     Arc::new(HttpEmbeddingClient::new(endpoint, None, "bge-small-en-v1.5")?),
//!     Arc::new(ChromaStore::new(store_url, key, "neu", "corpus")?),
//!     Arc::new(OpenAiCompatClient::new(llm_url, key, "gpt-4o-mini")?),
//! );
//!
//! let envelope = engine
//!     .answer("What undergraduate programs does Northeastern offer?", None, None)
//!     .await?;
//! println!("{}", envelope.answer);
//! ```
//!
//! ## Modules
//!
//! - [`rag`] - the retrieval and answer pipeline (the core)
//! - [`db`] - vector store clients
//! - [`llm`] - chat model clients
//! - [`api`] - REST handlers and routes
//! - [`types`] - common types and error handling
//! - [`utils`] - configuration

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// HTTP API handlers and routes.
pub mod api;
/// Vector store clients (Chroma, in-memory).
pub mod db;
/// Chat LLM provider clients.
pub mod llm;
/// Retrieval-augmented QA pipeline.
pub mod rag;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use db::{ChromaStore, InMemoryVectorStore, VectorStore};
pub use llm::{ChatClient, OpenAiCompatClient};
pub use rag::{EngineConfig, QueryEngine};
pub use types::{AnswerEnvelope, AppError, Mode, Result};
pub use utils::config::Config;

use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The query engine, constructed once at startup.
    pub engine: Arc<QueryEngine>,
    /// Server configuration.
    pub config: Arc<Config>,
}
