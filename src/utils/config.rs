//! Environment configuration.
//!
//! All configuration is read once at startup via [`Config::from_env`].
//! Missing required values fail fast with a `Configuration` error; the
//! environment is never consulted again mid-request.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{AppError, Mode, Result};

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP bind settings.
    pub server: ServerConfig,
    /// Retrieval orchestration settings.
    pub retrieval: RetrievalConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Vector store settings.
    pub vector_store: VectorStoreConfig,
    /// Chat LLM settings.
    pub llm: LLMConfig,
}

/// HTTP bind configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

/// Retrieval orchestration configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Default mode applied when a request does not name one.
    pub default_mode: Mode,
    /// Presence selects the unified-collection path over shard fan-out.
    pub unified_collection_id: Option<String>,
    /// TTL for the cached shard list.
    pub shard_list_ttl_secs: u64,
    /// Global cap on concurrent in-flight upstream requests.
    pub max_inflight_upstream: usize,
}

impl RetrievalConfig {
    /// Shard-list TTL as a `Duration`.
    pub fn shard_list_ttl(&self) -> Duration {
        Duration::from_secs(self.shard_list_ttl_secs)
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider endpoint.
    pub endpoint: String,
    /// Optional API key sent as a bearer token.
    pub api_key: Option<String>,
    /// Model identifier sent with every request.
    pub model_id: String,
    /// Maximum entries kept in the embedding LRU cache.
    pub cache_size: usize,
}

/// Remote vector store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    /// Store base URL.
    pub endpoint: String,
    /// API key sent with every request.
    pub api_key: String,
    /// Tenant scoping every request path.
    pub tenant: String,
    /// Database scoping every request path.
    pub database: String,
}

/// Chat LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    /// OpenAI-compatible API base URL.
    pub endpoint: String,
    /// Bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Ceiling on output tokens per request.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

fn required(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Configuration(format!("{} must be set", name)))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| AppError::Configuration(format!("{} is not a valid value: {}", name, raw))),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration from the environment, failing fast on missing
    /// required values.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let default_mode = match env::var("MODE") {
            Ok(raw) if !raw.is_empty() => raw
                .parse::<Mode>()
                .map_err(|e| AppError::Configuration(format!("MODE: {}", e)))?,
            _ => Mode::default(),
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parsed_or("PORT", 3000)?,
            },
            retrieval: RetrievalConfig {
                default_mode,
                unified_collection_id: env::var("UNIFIED_COLLECTION_ID")
                    .ok()
                    .filter(|v| !v.is_empty()),
                shard_list_ttl_secs: parsed_or("SHARD_LIST_TTL_SECONDS", 3600)?,
                max_inflight_upstream: parsed_or("MAX_INFLIGHT_UPSTREAM", 64)?,
            },
            embedding: EmbeddingConfig {
                endpoint: required("EMBED_ENDPOINT")?,
                api_key: env::var("EMBED_API_KEY").ok().filter(|v| !v.is_empty()),
                model_id: required("EMBED_MODEL_ID")?,
                cache_size: parsed_or("EMBED_CACHE_SIZE", 1024)?,
            },
            vector_store: VectorStoreConfig {
                endpoint: required("VECTOR_STORE_ENDPOINT")?,
                api_key: required("VECTOR_STORE_API_KEY")?,
                tenant: required("VECTOR_STORE_TENANT")?,
                database: required("VECTOR_STORE_DATABASE")?,
            },
            llm: LLMConfig {
                endpoint: required("LLM_ENDPOINT")?,
                api_key: required("LLM_API_KEY")?,
                model: required("LLM_MODEL")?,
                max_tokens: parsed_or("LLM_MAX_TOKENS", 500)?,
                temperature: parsed_or("LLM_TEMPERATURE", 0.2)?,
            },
        })
    }

    /// Whether the store exposes a single unified collection.
    pub fn is_unified(&self) -> bool {
        self.retrieval.unified_collection_id.is_some()
    }
}
