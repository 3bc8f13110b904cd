//! Vector Store Abstraction Layer
//!
//! This module provides a unified interface for vector store operations,
//! allowing the retrieval pipeline to work against either the remote
//! Chroma-compatible store or an in-memory store for tests.
//!
//! The interface is intentionally narrow: the pipeline only needs to list
//! collections and run a cosine top-k query against one collection with a
//! per-query timeout. Everything else (ingestion, collection management)
//! belongs to the ingestion pipeline, which is a separate system.
//!
//! # Error mapping
//!
//! Per-collection failures (timeout, transport error, missing collection)
//! are non-fatal: implementations return them as errors and the retrieval
//! orchestrator absorbs them to preserve recall under partial failure.
//! Global failures (auth, DNS) must surface as
//! [`AppError::VectorStoreUnavailable`] so the caller can distinguish a
//! degraded answer from a dead store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, Candidate, Result};

// ============================================================================
// Collection Metadata
// ============================================================================

/// A collection known to the vector store.
///
/// When the corpus is sharded, each shard is one collection; shard names
/// containing `"batch"` partition the corpus, other collections are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Store-assigned collection id.
    pub id: String,
    /// Human-readable collection name.
    pub name: String,
    /// Approximate number of vectors, when the store reports it.
    pub approx_size: Option<usize>,
}

impl CollectionInfo {
    /// Whether this collection holds a partition of the corpus.
    pub fn is_corpus_shard(&self) -> bool {
        self.name.contains("batch")
    }
}

// ============================================================================
// Distance Metrics
// ============================================================================

/// Distance metric reported by a store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Cosine distance in [0, 2].
    Cosine,
    /// Anything the store did not declare.
    Unknown,
}

/// Convert a store-native distance into a similarity in [0, 1].
///
/// Cosine distance maps through `1 - d/2`; an unknown metric falls back to
/// `1 / (1 + d)`. Both are strictly decreasing in the distance.
pub fn similarity_from_distance(metric: DistanceMetric, distance: f32) -> f32 {
    let similarity = match metric {
        DistanceMetric::Cosine => 1.0 - distance / 2.0,
        DistanceMetric::Unknown => 1.0 / (1.0 + distance.max(0.0)),
    };
    similarity.clamp(0.0, 1.0)
}

// ============================================================================
// Vector Store Trait
// ============================================================================

/// Abstract interface over a vector store.
///
/// # Implementors
///
/// - [`super::ChromaStore`] - Chroma-compatible HTTP store (production)
/// - [`InMemoryVectorStore`] - in-process store for tests
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of this store implementation, for logs.
    fn provider_name(&self) -> &'static str;

    /// Distance metric this store's queries return.
    fn distance_metric(&self) -> DistanceMetric;

    /// List every collection in the store.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::VectorStoreUnavailable`] when the store cannot be
    /// reached at all.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Run a top-k similarity query against one collection.
    ///
    /// # Arguments
    ///
    /// * `collection_id` - Collection to query.
    /// * `embedding` - Unit-normalized query vector.
    /// * `k` - Maximum candidates to return.
    /// * `timeout` - Per-query wall-clock bound.
    ///
    /// # Errors
    ///
    /// Per-collection failures come back as errors here; the orchestrator
    /// treats them as an empty result plus a warning rather than unwinding.
    async fn query_collection(
        &self,
        collection_id: &str,
        embedding: &[f32],
        k: usize,
        timeout: Duration,
    ) -> Result<Vec<Candidate>>;
}

// ============================================================================
// In-Memory Vector Store (for testing)
// ============================================================================

/// A stored document in the in-memory store.
#[derive(Debug, Clone)]
struct StoredDoc {
    id: String,
    content: String,
    metadata: HashMap<String, String>,
    embedding: Vec<f32>,
}

#[derive(Debug, Default)]
struct InMemoryCollection {
    name: String,
    docs: Vec<StoredDoc>,
    /// Queries against this collection fail with an injected error.
    fail_queries: bool,
    /// Artificial latency applied before answering a query.
    latency: Option<Duration>,
}

/// In-memory vector store for testing purposes.
///
/// Uses cosine distance (`1 - cos(a, b)`) so similarities line up with the
/// production mapping. Collections can be configured to fail or to respond
/// slowly, which is how the fan-out failure and deadline paths are tested.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
    fail_listing: AtomicBool,
}

impl InMemoryVectorStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection. The collection id doubles as its name unless a
    /// distinct name is given.
    pub fn create_collection(&self, id: &str, name: &str) {
        let mut collections = self.collections.write();
        collections.insert(
            id.to_string(),
            InMemoryCollection {
                name: name.to_string(),
                ..Default::default()
            },
        );
    }

    /// Insert a document into a collection, creating the collection if it
    /// does not exist.
    pub fn add_document(
        &self,
        collection_id: &str,
        doc_id: &str,
        content: &str,
        metadata: HashMap<String, String>,
        embedding: Vec<f32>,
    ) {
        let mut collections = self.collections.write();
        let collection = collections
            .entry(collection_id.to_string())
            .or_insert_with(|| InMemoryCollection {
                name: collection_id.to_string(),
                ..Default::default()
            });
        collection.docs.push(StoredDoc {
            id: doc_id.to_string(),
            content: content.to_string(),
            metadata,
            embedding,
        });
    }

    /// Make queries against a collection fail with a transport-style error.
    pub fn fail_collection(&self, collection_id: &str) {
        if let Some(collection) = self.collections.write().get_mut(collection_id) {
            collection.fail_queries = true;
        }
    }

    /// Delay every query against a collection by `latency`.
    pub fn slow_collection(&self, collection_id: &str, latency: Duration) {
        if let Some(collection) = self.collections.write().get_mut(collection_id) {
            collection.latency = Some(latency);
        }
    }

    /// Make `list_collections` fail, simulating a full store outage.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::Relaxed);
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    fn distance_metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        if self.fail_listing.load(Ordering::Relaxed) {
            return Err(AppError::VectorStoreUnavailable(
                "injected listing failure".to_string(),
            ));
        }
        let collections = self.collections.read();
        let mut infos: Vec<CollectionInfo> = collections
            .iter()
            .map(|(id, collection)| CollectionInfo {
                id: id.clone(),
                name: collection.name.clone(),
                approx_size: Some(collection.docs.len()),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn query_collection(
        &self,
        collection_id: &str,
        embedding: &[f32],
        k: usize,
        timeout: Duration,
    ) -> Result<Vec<Candidate>> {
        let (docs, latency) = {
            let collections = self.collections.read();
            let collection = collections.get(collection_id).ok_or_else(|| {
                AppError::Internal(format!("Collection '{}' not found", collection_id))
            })?;
            if collection.fail_queries {
                return Err(AppError::Internal(format!(
                    "injected query failure for '{}'",
                    collection_id
                )));
            }
            (collection.docs.clone(), collection.latency)
        };

        if let Some(latency) = latency {
            if latency >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(AppError::Internal(format!(
                    "query against '{}' timed out",
                    collection_id
                )));
            }
            tokio::time::sleep(latency).await;
        }

        let mut candidates: Vec<Candidate> = docs
            .into_iter()
            .map(|doc| {
                let distance = 1.0 - Self::cosine_similarity(embedding, &doc.embedding);
                let similarity = similarity_from_distance(DistanceMetric::Cosine, distance);
                Candidate::from_store(
                    doc.id,
                    collection_id.to_string(),
                    doc.content,
                    doc.metadata,
                    distance,
                    similarity,
                )
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.raw_distance
                .total_cmp(&b.raw_distance)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        candidates.truncate(k);
        Ok(candidates)
    }
}

// ============================================================================
// Tests
// ============================================================================
