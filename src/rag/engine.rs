//! Query Engine
//!
//! The engine is the dependency-injection seam of the whole service: it is
//! constructed once at startup with its embedding provider, vector store,
//! chat client, and configuration, then shared by request handlers. Nothing
//! in the pipeline reads the environment or mutates globals mid-call.
//!
//! Per request the engine runs the pipeline:
//!
//! ```text
//! question -> embed -> retrieve (fan-out/merge) -> enhance + rerank -> generate
//! ```
//!
//! recording a per-stage timing for each arrow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::db::vectorstore::VectorStore;
use crate::llm::client::ChatClient;
use crate::rag::cache::{CacheStats, CachedShardList, EmbeddingCache};
use crate::rag::embeddings::{EmbeddingGateway, EmbeddingProvider};
use crate::rag::generator::AnswerGenerator;
use crate::rag::retriever::{FanoutParams, Retriever};
use crate::rag::{metadata, reranker};
use crate::types::{
    AnswerEnvelope, AppError, Mode, Question, Result, Timings,
};
use crate::utils::config::Config;

/// Question length bounds enforced at the edge.
const MIN_QUESTION_CHARS: usize = 1;
const MAX_QUESTION_CHARS: usize = 2000;

/// Maximum age for a cached question embedding.
const EMBED_CACHE_MAX_AGE: Duration = Duration::from_secs(600);

// ============================================================================
// Engine Configuration
// ============================================================================

/// The subset of configuration the engine needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Mode applied when a request does not name one.
    pub default_mode: Mode,
    /// Presence selects the unified-collection path.
    pub unified_collection_id: Option<String>,
    /// TTL on the cached shard list.
    pub shard_list_ttl: Duration,
    /// Process-wide cap on concurrent upstream requests.
    pub max_inflight_upstream: usize,
    /// Entry bound on the embedding cache.
    pub embed_cache_entries: usize,
    /// Chat sampling temperature.
    pub llm_temperature: f32,
    /// Ceiling on chat output tokens.
    pub llm_max_tokens: u32,
}

impl EngineConfig {
    /// Extract engine configuration from the full server config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_mode: config.retrieval.default_mode,
            unified_collection_id: config.retrieval.unified_collection_id.clone(),
            shard_list_ttl: config.retrieval.shard_list_ttl(),
            max_inflight_upstream: config.retrieval.max_inflight_upstream,
            embed_cache_entries: config.embedding.cache_size,
            llm_temperature: config.llm.temperature,
            llm_max_tokens: config.llm.max_tokens,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::Fast,
            unified_collection_id: None,
            shard_list_ttl: Duration::from_secs(3600),
            max_inflight_upstream: 64,
            embed_cache_entries: 1024,
            llm_temperature: 0.2,
            llm_max_tokens: 500,
        }
    }
}

// ============================================================================
// Query Engine
// ============================================================================

/// The retrieval-augmented QA engine.
pub struct QueryEngine {
    embedder: EmbeddingGateway,
    retriever: Retriever,
    generator: AnswerGenerator,
    /// Process-wide cap on in-flight upstream requests, shared with the
    /// retriever's shard queries and the generator's chat calls.
    upstream: Arc<Semaphore>,
    default_mode: Mode,
}

impl QueryEngine {
    /// Construct the engine from its collaborators.
    pub fn new(
        config: EngineConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        let upstream = Arc::new(Semaphore::new(config.max_inflight_upstream.max(1)));
        let embedder = EmbeddingGateway::new(
            embedding_provider,
            EmbeddingCache::new(config.embed_cache_entries, EMBED_CACHE_MAX_AGE),
        );
        let retriever = Retriever::new(
            store,
            config.shard_list_ttl,
            config.unified_collection_id.clone(),
            Arc::clone(&upstream),
        );
        let generator = AnswerGenerator::new(
            chat,
            config.llm_temperature,
            config.llm_max_tokens,
            Arc::clone(&upstream),
        );

        Self {
            embedder,
            retriever,
            generator,
            upstream,
            default_mode: config.default_mode,
        }
    }

    /// The configured default mode.
    pub fn default_mode(&self) -> Mode {
        self.default_mode
    }

    /// Whether the engine runs against a unified collection.
    pub fn is_unified(&self) -> bool {
        self.retriever.is_unified()
    }

    /// Answer a question end to end.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidInput`] for out-of-bounds question length
    /// - [`AppError::EmbeddingUnavailable`] when the question cannot be embedded
    /// - [`AppError::VectorStoreUnavailable`] when no shard list can be obtained
    /// - [`AppError::LLMUnavailable`] when generation fails outright
    pub async fn answer(
        &self,
        text: &str,
        mode: Option<Mode>,
        trace_id: Option<String>,
    ) -> Result<AnswerEnvelope> {
        let text = text.trim();
        let length = text.chars().count();
        if !(MIN_QUESTION_CHARS..=MAX_QUESTION_CHARS).contains(&length) {
            return Err(AppError::InvalidInput(format!(
                "question must be between {} and {} characters, got {}",
                MIN_QUESTION_CHARS, MAX_QUESTION_CHARS, length
            )));
        }

        let mode = mode.unwrap_or(self.default_mode);
        let question = Question {
            text: text.to_string(),
            trace_id: trace_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            deadline: Instant::now() + FanoutParams::for_mode(mode).budget,
            mode,
        };

        let started = Instant::now();
        let mut timings = Timings::default();

        let stage = Instant::now();
        let embedding = {
            let _permit = self.upstream.acquire().await.map_err(|_| {
                AppError::Internal("upstream request limiter closed".to_string())
            })?;
            self.embedder.embed(&question.text).await?
        };
        timings.embed_ms = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let retrieval = self.retriever.retrieve(&question, &embedding).await?;
        timings.search_ms = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let mut candidates = retrieval.candidates;
        for candidate in &mut candidates {
            metadata::enhance(candidate);
        }
        let ranked = reranker::rank(&question.text, candidates);
        timings.rerank_ms = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let generation = self.generator.generate(&question, &ranked).await?;
        timings.generate_ms = stage.elapsed().as_millis() as u64;
        timings.total_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            trace_id = %question.trace_id,
            mode = %question.mode,
            shards_queried = retrieval.shards_queried,
            shards_failed = retrieval.shards_failed,
            used_sources = generation.used_sources_count,
            deadline_exceeded = retrieval.deadline_exceeded,
            total_ms = timings.total_ms,
            "answered question"
        );

        Ok(AnswerEnvelope {
            answer: generation.answer,
            sources: generation.sources,
            confidence: generation.confidence,
            timings,
            used_sources_count: generation.used_sources_count,
            deadline_exceeded: retrieval.deadline_exceeded,
        })
    }

    /// Force a shard-list refresh, returning the new shard count.
    pub async fn refresh_shards(&self) -> Result<usize> {
        let refreshed = self.retriever.shard_list(true).await?;
        Ok(refreshed.shards.len())
    }

    /// Embedding-cache statistics.
    pub fn embed_cache_stats(&self) -> CacheStats {
        self.embedder.cache_stats()
    }

    /// Cached shard list snapshot, if one exists.
    pub fn cached_shards(&self) -> Option<Arc<CachedShardList>> {
        self.retriever.cached_shards()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::vectorstore::InMemoryVectorStore;
    use crate::llm::client::{ChatMessage, ChatOptions};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn model_id(&self) -> &str {
            "fixed"
        }
    }

    struct FixedChat(String);

    #[async_trait]
    impl crate::llm::client::ChatClient for FixedChat {
        async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn unified_engine() -> QueryEngine {
        let store = Arc::new(InMemoryVectorStore::new());
        let mut metadata = HashMap::new();
        metadata.insert("title".to_string(), "Co-op Programs".to_string());
        store.add_document(
            "unified",
            "doc1",
            "Northeastern co-op programs pair study with work.",
            metadata,
            vec![1.0, 0.0],
        );

        QueryEngine::new(
            EngineConfig {
                unified_collection_id: Some("unified".to_string()),
                ..Default::default()
            },
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            store,
            Arc::new(FixedChat(
                "Northeastern pairs classroom study with co-op work placements [1].".to_string(),
            )),
        )
    }

    #[tokio::test]
    async fn test_rejects_empty_question() {
        let engine = unified_engine();
        let err = engine.answer("   ", None, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rejects_oversized_question() {
        let engine = unified_engine();
        let long = "q".repeat(2001);
        let err = engine.answer(&long, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unified_path_answers() {
        let engine = unified_engine();
        let envelope = engine
            .answer("What co-op programs exist?", Some(Mode::Fast), None)
            .await
            .unwrap();

        assert!(!envelope.answer.is_empty());
        assert_eq!(envelope.used_sources_count, 1);
        assert_eq!(envelope.sources[0].title, "Co-op Programs");
        assert!(!envelope.deadline_exceeded);
        assert!(envelope.timings.total_ms <= 3000);
    }

    #[tokio::test]
    async fn test_trace_id_is_preserved_or_generated() {
        let engine = unified_engine();
        let envelope = engine
            .answer("What co-op programs exist?", None, Some("trace-1".into()))
            .await;
        assert!(envelope.is_ok());
    }
}
