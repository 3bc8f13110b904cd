//! End-to-end pipeline scenarios against mock collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::mocks::{sharded_corpus, unified_corpus, MockChatClient, MockEmbedder};
use near::db::InMemoryVectorStore;
use near::rag::{EngineConfig, QueryEngine};
use near::types::{AppError, Mode};

const ANSWER: &str = "Northeastern offers a wide range of undergraduate programs [1][2].";

fn engine(
    store: Arc<InMemoryVectorStore>,
    embedder: Arc<MockEmbedder>,
    chat: Arc<MockChatClient>,
    unified_collection_id: Option<String>,
) -> QueryEngine {
    QueryEngine::new(
        EngineConfig {
            unified_collection_id,
            ..Default::default()
        },
        embedder,
        store,
        chat,
    )
}

// ============================================================================
// Unified path, cache miss then hit
// ============================================================================

#[tokio::test]
async fn unified_path_cache_miss_then_hit() {
    let store = unified_corpus("unified", 10);
    let embedder = Arc::new(MockEmbedder::with_latency(
        vec![1.0, 0.0],
        Duration::from_millis(30),
    ));
    let chat = Arc::new(MockChatClient::new(ANSWER));
    let engine = engine(store, embedder.clone(), chat, Some("unified".to_string()));

    let question = "What undergraduate programs does Northeastern offer?";

    let first = engine.answer(question, None, None).await.unwrap();
    assert!(first.timings.embed_ms > 0, "cold embed pays the provider");
    assert!(first.used_sources_count >= 1);
    assert!(!first.deadline_exceeded);

    let second = engine.answer(question, None, None).await.unwrap();
    assert!(
        second.timings.embed_ms <= 5,
        "cache hit should be near-instant, got {} ms",
        second.timings.embed_ms
    );
    assert_eq!(embedder.calls(), 1, "second call must not reach the provider");
}

// ============================================================================
// Sharded fan-out with early stop
// ============================================================================

#[tokio::test]
async fn sharded_fanout_with_early_stop() {
    let store = sharded_corpus(100, 5);
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::new(ANSWER));
    let engine = engine(store, embedder, chat, None);

    let envelope = engine
        .answer("What programs exist?", Some(Mode::Fast), None)
        .await
        .unwrap();

    assert_eq!(envelope.used_sources_count, 5, "Fast mode prompts 5 sources");
    assert!(!envelope.deadline_exceeded);
    assert!(!envelope.answer.is_empty());
    assert_eq!(envelope.sources.len(), 5);
}

// ============================================================================
// Partial shard failure tolerated
// ============================================================================

#[tokio::test]
async fn partial_shard_failure_tolerated() {
    let store = sharded_corpus(50, 5);
    for shard in 0..10 {
        store.fail_collection(&format!("batch_{:04}", shard));
    }
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::new(ANSWER));
    let engine = engine(store, embedder, chat, None);

    let envelope = engine
        .answer("What student services exist?", Some(Mode::Fast), None)
        .await
        .unwrap();

    assert!(!envelope.answer.is_empty());
    assert!(!envelope.deadline_exceeded);
    assert!(envelope.used_sources_count >= 1);
}

// ============================================================================
// Full store outage
// ============================================================================

#[tokio::test]
async fn full_store_outage_surfaces() {
    let store = Arc::new(InMemoryVectorStore::new());
    store.fail_listing(true);
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::new(ANSWER));
    let engine = engine(store, embedder, chat, None);

    let err = engine
        .answer("Anything?", Some(Mode::Fast), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VectorStoreUnavailable(_)));
}

// ============================================================================
// LLM failure handling
// ============================================================================

#[tokio::test]
async fn llm_timeout_surfaces_without_fallback() {
    let store = unified_corpus("unified", 10);
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    // Blocks well past the remaining budget; no retry budget remains after
    // the first timeout, so no fallback generation happens.
    let chat = Arc::new(MockChatClient::slow(ANSWER, Duration::from_secs(30)));
    let engine = engine(store, embedder, chat.clone(), Some("unified".to_string()));

    let err = engine
        .answer("What programs exist?", Some(Mode::UltraFast), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::LLMUnavailable(_)));
    assert_eq!(chat.calls(), 1, "no retry without at least 1 s of budget");
}

#[tokio::test]
async fn llm_hard_failure_retries_then_surfaces() {
    let store = unified_corpus("unified", 5);
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::failing());
    let engine = engine(store, embedder, chat.clone(), Some("unified".to_string()));

    // A hard failure with remaining budget retries once, then surfaces.
    let err = engine
        .answer("What programs exist?", Some(Mode::Balanced), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LLMUnavailable(_)));
    assert_eq!(chat.calls(), 2, "one retry while budget remains");
}

// ============================================================================
// Title synthesis end to end
// ============================================================================

#[tokio::test]
async fn title_synthesis_replaces_junk_metadata() {
    let store = Arc::new(InMemoryVectorStore::new());
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("title".to_string(), "Untitled Document".to_string());
    store.add_document(
        "unified",
        "doc1",
        "# Graduate Admissions\nApplications for fall open in September.",
        metadata,
        vec![1.0, 0.0],
    );
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::new(
        "Applications for fall graduate admission open in September [1].",
    ));
    let engine = engine(store, embedder, chat, Some("unified".to_string()));

    let envelope = engine
        .answer("When do graduate applications open?", None, None)
        .await
        .unwrap();

    assert_eq!(envelope.sources[0].title, "Graduate Admissions");
}

// ============================================================================
// Envelope invariants
// ============================================================================

#[tokio::test]
async fn confidence_stays_in_unit_interval() {
    let store = unified_corpus("unified", 10);
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::new(ANSWER));
    let engine = engine(store, embedder, chat, Some("unified".to_string()));

    for mode in [Mode::UltraFast, Mode::Fast, Mode::Balanced, Mode::Comprehensive] {
        let envelope = engine
            .answer("What undergraduate programs exist?", Some(mode), None)
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&envelope.confidence));
        assert!(envelope.sources.len() <= 5);
        for source in &envelope.sources {
            assert!((0.0..=1.0).contains(&source.similarity));
            assert!(source.excerpt.chars().count() <= 240);
        }
    }
}

#[tokio::test]
async fn no_info_answer_gets_low_confidence() {
    let store = unified_corpus("unified", 5);
    let embedder = Arc::new(MockEmbedder::fixed(vec![1.0, 0.0]));
    let chat = Arc::new(MockChatClient::new(
        "The provided sources do not contain information about parking permits.",
    ));
    let engine = engine(store, embedder, chat, Some("unified".to_string()));

    let envelope = engine
        .answer("How do I get a parking permit?", None, None)
        .await
        .unwrap();
    assert!((envelope.confidence - 0.2).abs() < 1e-6);
}
