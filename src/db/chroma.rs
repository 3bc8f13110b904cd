//! Chroma-compatible vector store client.
//!
//! Speaks the Chroma v2 REST API: collections are listed per
//! tenant/database, and similarity queries post a query embedding against a
//! single collection. The reference corpus stores cosine distances, so
//! similarities map through `1 - d/2`.
//!
//! # Error mapping
//!
//! - Auth rejections and connection-level failures mean the whole store is
//!   unusable and surface as [`AppError::VectorStoreUnavailable`].
//! - Everything else (per-collection timeout, 4xx/5xx on one collection,
//!   malformed payload) is a per-collection failure: it comes back as an
//!   `Internal` error with a warning logged, and the retrieval orchestrator
//!   absorbs it without unwinding the request.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::db::vectorstore::{
    similarity_from_distance, CollectionInfo, DistanceMetric, VectorStore,
};
use crate::types::{AppError, Candidate, Result};

/// Header carrying the store API key.
const AUTH_HEADER: &str = "X-Chroma-Token";

/// HTTP client for a Chroma-compatible vector store.
pub struct ChromaStore {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    tenant: String,
    database: String,
}

impl ChromaStore {
    /// Create a new client against the given endpoint.
    ///
    /// The endpoint is the server base URL (e.g. `https://store.example.com`);
    /// tenant and database scope every request path.
    pub fn new(endpoint: &str, api_key: &str, tenant: &str, database: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            tenant: tenant.to_string(),
            database: database.to_string(),
        })
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.endpoint, self.tenant, self.database
        )
    }

    fn query_url(&self, collection_id: &str) -> String {
        format!("{}/{}/query", self.collections_url(), collection_id)
    }

    /// Map a transport error to the right failure class. Connection-level
    /// failures (DNS, refused) condemn the whole store; timeouts and body
    /// errors only condemn the one collection being queried.
    fn classify_transport(context: &str, err: reqwest::Error) -> AppError {
        if err.is_connect() {
            AppError::VectorStoreUnavailable(format!("{}: connection failed", context))
        } else if err.is_timeout() {
            AppError::Internal(format!("{}: request timed out", context))
        } else {
            AppError::Internal(format!("{}: transport error", context))
        }
    }

    fn classify_status(context: &str, status: reqwest::StatusCode) -> AppError {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            AppError::VectorStoreUnavailable(format!("{}: authentication rejected", context))
        } else {
            AppError::Internal(format!("{}: HTTP {}", context, status.as_u16()))
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireCollection {
    id: String,
    name: String,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WireQueryResponse {
    ids: Vec<Vec<String>>,
    distances: Vec<Vec<f32>>,
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<HashMap<String, Value>>>>,
}

/// Flatten store metadata values to strings; the corpus only stores scalar
/// metadata (title, url, source page info).
fn stringify_metadata(raw: Option<HashMap<String, Value>>) -> HashMap<String, String> {
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

#[async_trait::async_trait]
impl VectorStore for ChromaStore {
    fn provider_name(&self) -> &'static str {
        "chroma"
    }

    fn distance_metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let response = self
            .http
            .get(self.collections_url())
            .header(AUTH_HEADER, &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| match Self::classify_transport("list_collections", e) {
                // A dead store while listing is always a global failure.
                AppError::Internal(msg) => AppError::VectorStoreUnavailable(msg),
                other => other,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(match Self::classify_status("list_collections", status) {
                AppError::Internal(msg) => AppError::VectorStoreUnavailable(msg),
                other => other,
            });
        }

        let collections: Vec<WireCollection> = response.json().await.map_err(|e| {
            AppError::VectorStoreUnavailable(format!("list_collections: malformed response: {}", e))
        })?;

        Ok(collections
            .into_iter()
            .map(|c| CollectionInfo {
                id: c.id,
                name: c.name,
                approx_size: c.count,
            })
            .collect())
    }

    async fn query_collection(
        &self,
        collection_id: &str,
        embedding: &[f32],
        k: usize,
        timeout: Duration,
    ) -> Result<Vec<Candidate>> {
        let context = format!("query {}", collection_id);
        let body = serde_json::json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });

        let response = self
            .http
            .post(self.query_url(collection_id))
            .header(AUTH_HEADER, &self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = Self::classify_transport(&context, e);
                if matches!(err, AppError::Internal(_)) {
                    tracing::warn!(collection_id, error = %err, "shard query failed");
                }
                err
            })?;

        if !response.status().is_success() {
            let err = Self::classify_status(&context, response.status());
            if matches!(err, AppError::Internal(_)) {
                tracing::warn!(collection_id, error = %err, "shard query failed");
            }
            return Err(err);
        }

        let wire: WireQueryResponse = response.json().await.map_err(|e| {
            tracing::warn!(collection_id, error = %e, "shard query returned malformed body");
            AppError::Internal(format!("{}: malformed response", context))
        })?;

        // One query embedding in, one result row out.
        let ids = wire.ids.into_iter().next().unwrap_or_default();
        let distances = wire.distances.into_iter().next().unwrap_or_default();
        let mut documents = wire.documents.into_iter().next().unwrap_or_default();
        let mut metadatas = wire.metadatas.into_iter().next().unwrap_or_default();
        documents.resize(ids.len(), None);
        metadatas.resize(ids.len(), None);

        let metric = self.distance_metric();
        let candidates = ids
            .into_iter()
            .zip(distances)
            .zip(documents.into_iter().zip(metadatas))
            .map(|((doc_id, distance), (document, metadata))| {
                Candidate::from_store(
                    doc_id,
                    collection_id.to_string(),
                    document.unwrap_or_default(),
                    stringify_metadata(metadata),
                    distance,
                    similarity_from_distance(metric, distance),
                )
            })
            .collect();

        Ok(candidates)
    }
}

// ============================================================================
// Tests
// ============================================================================
