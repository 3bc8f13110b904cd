//! Mock implementations for testing.
//!
//! This module provides mock embedding and chat clients plus corpus
//! builders that can be used across different test files without
//! duplication. All mocks are deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use near::db::InMemoryVectorStore;
use near::llm::{ChatClient, ChatMessage, ChatOptions};
use near::rag::EmbeddingProvider;
use near::types::{AppError, Result};

// ============================================================================
// Mock Embedding Provider
// ============================================================================

/// Mock embedding provider returning a fixed unit vector.
///
/// An optional artificial latency makes cache-hit timing observable: the
/// first call pays the latency, a cached second call does not.
pub struct MockEmbedder {
    vector: Vec<f32>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    /// Provider that always returns `vector`.
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            vector,
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Same, but each provider call takes `latency` of wall-clock time.
    pub fn with_latency(vector: Vec<f32>, latency: Duration) -> Self {
        Self {
            vector,
            latency: Some(latency),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of provider calls made so far (cache hits do not count).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.vector.clone())
    }

    fn model_id(&self) -> &str {
        "mock-embedder"
    }
}

// ============================================================================
// Mock Chat Client
// ============================================================================

/// Mock chat client with configurable behavior.
pub struct MockChatClient {
    response: String,
    latency: Option<Duration>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockChatClient {
    /// Client that returns the given response immediately.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            latency: None,
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Client that always fails with a transport-style error.
    pub fn failing() -> Self {
        Self {
            response: String::new(),
            latency: None,
            should_fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Client that takes `latency` to answer. Like the real HTTP client it
    /// honors the request timeout: if the latency exceeds it, the call
    /// fails with `LLMUnavailable` after the timeout elapses.
    pub fn slow(response: &str, latency: Duration) -> Self {
        Self {
            response: response.to_string(),
            latency: Some(latency),
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of chat calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn chat(&self, _messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(AppError::LLMUnavailable("mock chat failure".to_string()));
        }
        if let Some(latency) = self.latency {
            if latency > options.timeout {
                tokio::time::sleep(options.timeout).await;
                return Err(AppError::LLMUnavailable("chat request timed out".to_string()));
            }
            tokio::time::sleep(latency).await;
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

// ============================================================================
// Corpus Builders
// ============================================================================

/// Build doc metadata with a title and url.
pub fn doc_metadata(title: &str, url: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("title".to_string(), title.to_string());
    metadata.insert("url".to_string(), url.to_string());
    metadata
}

/// A unit vector close to the canonical query vector `[1, 0]`, distinct per
/// seed so distances (and therefore orderings) are stable but not equal.
pub fn near_query_vector(seed: usize) -> Vec<f32> {
    let offset = 0.001 * (seed as f32 + 1.0);
    let norm = (1.0 + offset * offset).sqrt();
    vec![1.0 / norm, offset / norm]
}

/// Build a unified-collection corpus of `doc_count` documents.
pub fn unified_corpus(collection_id: &str, doc_count: usize) -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    for i in 0..doc_count {
        store.add_document(
            collection_id,
            &format!("doc-{:03}", i),
            &format!(
                "Northeastern University offers undergraduate programs in area {}. \
                 Students combine classroom study with co-op placements.",
                i
            ),
            doc_metadata(
                &format!("Program Area {}", i),
                &format!("https://northeastern.edu/programs/{}", i),
            ),
            near_query_vector(i),
        );
    }
    store
}

/// Build a sharded corpus: `shard_count` shards named `batch_NNNN`, each
/// holding `docs_per_shard` documents.
pub fn sharded_corpus(shard_count: usize, docs_per_shard: usize) -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    for shard in 0..shard_count {
        let collection_id = format!("batch_{:04}", shard);
        store.create_collection(&collection_id, &collection_id);
        for doc in 0..docs_per_shard {
            let seed = shard * docs_per_shard + doc;
            store.add_document(
                &collection_id,
                &format!("doc-{:05}", seed),
                &format!(
                    "Northeastern campus resource {} covering programs and student services.",
                    seed
                ),
                doc_metadata(
                    &format!("Resource {}", seed),
                    &format!("https://northeastern.edu/resource/{}", seed),
                ),
                near_query_vector(seed),
            );
        }
    }
    store
}
