//! Embedding Gateway
//!
//! Turns question text into a unit-normalized dense vector. The gateway
//! wraps any [`EmbeddingProvider`] with:
//!
//! - text normalization (trim, collapse internal whitespace) before the
//!   provider call, plus lowercasing for the cache key only
//! - an LRU cache so repeated or near-repeated questions return in
//!   microseconds
//! - a hard 1.5 s bound on the provider call, with one retry after a
//!   250 ms backoff on transient failure
//! - enforcement of the unit-norm invariant on whatever the provider sends
//!   back

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::rag::cache::{CacheStats, EmbeddingCache};
use crate::types::{AppError, Result};

/// Upper bound on a single provider call.
pub const EMBED_TIMEOUT: Duration = Duration::from_millis(1500);

/// Backoff before the single retry.
pub const EMBED_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Tolerance on the unit-norm invariant.
const NORM_TOLERANCE: f32 = 1e-3;

// ============================================================================
// Provider Trait
// ============================================================================

/// A provider that maps text to a fixed-dimension embedding vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model identifier, used to scope cache keys.
    fn model_id(&self) -> &str;
}

// ============================================================================
// HTTP Provider
// ============================================================================

/// HTTP embedding provider.
///
/// Posts `{"model": ..., "text": ...}` and expects `{"vector": [...]}`.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    vector: Vec<f32>,
}

impl HttpEmbeddingClient {
    /// Create a new client against the given endpoint.
    pub fn new(endpoint: &str, api_key: Option<String>, model_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
            model_id: model_id.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model_id,
            "text": text,
        });

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::EmbeddingUnavailable("embedding request timed out".to_string())
            } else {
                AppError::EmbeddingUnavailable("embedding request failed".to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(AppError::EmbeddingUnavailable(format!(
                "embedding endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let wire: WireEmbedding = response
            .json()
            .await
            .map_err(|_| AppError::EmbeddingUnavailable("malformed embedding response".into()))?;
        Ok(wire.vector)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Text Normalization
// ============================================================================

/// Trim and collapse internal whitespace. The provider sees this form; the
/// cache key additionally lowercases it.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Enforce the unit-norm invariant, rescaling when the provider's vector
/// drifts outside tolerance.
fn ensure_unit_norm(mut vector: Vec<f32>) -> Result<Vec<f32>> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(AppError::EmbeddingUnavailable(
            "embedding provider returned a degenerate vector".to_string(),
        ));
    }
    if (norm - 1.0).abs() > NORM_TOLERANCE {
        for value in &mut vector {
            *value /= norm;
        }
    }
    Ok(vector)
}

// ============================================================================
// Gateway
// ============================================================================

/// Caching, deadline-bounded front door to the embedding provider.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl EmbeddingGateway {
    /// Create a gateway around a provider with the given cache.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Embed a question, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EmbeddingUnavailable`] when the provider fails
    /// twice or exceeds the 1.5 s bound.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = normalize_text(text);
        let key = EmbeddingCache::compute_key(&normalized.to_lowercase(), self.provider.model_id());

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let vector = match self.call_provider(&normalized).await {
            Ok(vector) => vector,
            Err(first) => {
                tracing::warn!(error = %first, "embedding call failed, retrying once");
                tokio::time::sleep(EMBED_RETRY_BACKOFF).await;
                self.call_provider(&normalized).await?
            }
        };

        let vector = ensure_unit_norm(vector)?;
        self.cache.put_if_absent(&key, vector.clone());
        Ok(vector)
    }

    async fn call_provider(&self, text: &str) -> Result<Vec<f32>> {
        match tokio::time::timeout(EMBED_TIMEOUT, self.provider.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::EmbeddingUnavailable(
                "embedding call exceeded its time bound".to_string(),
            )),
        }
    }

    /// Cache statistics, for the info endpoint.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached embedding.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }
}

// ============================================================================
// Tests
// ============================================================================
