//! Retrieval Orchestrator
//!
//! Given a question embedding, produces a bounded, merged candidate list
//! within the mode's wall-clock budget. Two dispatch paths exist depending
//! on store topology:
//!
//! - **Unified path**: one collection holds the whole corpus; a single
//!   top-k query suffices.
//! - **Sharded path**: the corpus is split across thousands of small
//!   collections. Queries fan out through a worker pool of at most 10
//!   concurrent in-flight requests, merge through a bounded buffer keyed by
//!   raw distance, and stop early once enough candidates have accumulated.
//!
//! # Failure semantics
//!
//! Per-shard failures are absorbed: each shard query resolves to an ok/err
//! outcome and the orchestrator aggregates without unwinding. If every
//! shard fails, the result is an empty list with `deadline_exceeded` set.
//! Only a missing shard list with no cached fallback surfaces
//! [`AppError::VectorStoreUnavailable`].
//!
//! # Determinism
//!
//! Shard selection is a name-sort prefix, so repeated queries see the same
//! shards. The merge orders candidates by (distance, collection id, doc id)
//! and collapses duplicate doc ids keeping the lower distance, so the final
//! ordering is a function of the returned candidates alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::db::vectorstore::{CollectionInfo, VectorStore};
use crate::rag::cache::{CachedShardList, ShardListCache};
use crate::types::{AppError, Candidate, Mode, Question, Result};

/// Maximum concurrent in-flight shard queries per request.
const FANOUT_WORKERS: usize = 10;

// ============================================================================
// Mode Parameters
// ============================================================================

/// Per-mode fan-out discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutParams {
    /// Shards queried at most; `None` means all of them.
    pub shard_cap: Option<usize>,
    /// Top-k requested from each shard.
    pub k_per_shard: usize,
    /// Wall-clock bound per shard query.
    pub per_shard_timeout: Duration,
    /// Candidates accumulated before outstanding work is cancelled.
    pub early_stop: Option<usize>,
    /// Size of the merged candidate list handed to the relevance layer.
    pub final_top_k: usize,
    /// Overall retrieval-to-answer budget for the mode.
    pub budget: Duration,
}

impl FanoutParams {
    /// The fan-out table for a mode.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::UltraFast => Self {
                shard_cap: Some(50),
                k_per_shard: 3,
                per_shard_timeout: Duration::from_millis(1000),
                early_stop: Some(10),
                final_top_k: 15,
                budget: Duration::from_millis(1500),
            },
            Mode::Fast => Self {
                shard_cap: Some(200),
                k_per_shard: 3,
                per_shard_timeout: Duration::from_millis(1000),
                early_stop: Some(20),
                final_top_k: 30,
                budget: Duration::from_millis(2500),
            },
            Mode::Balanced => Self {
                shard_cap: Some(500),
                k_per_shard: 5,
                per_shard_timeout: Duration::from_millis(1200),
                early_stop: Some(40),
                final_top_k: 40,
                budget: Duration::from_millis(4000),
            },
            Mode::Comprehensive => Self {
                shard_cap: None,
                k_per_shard: 5,
                per_shard_timeout: Duration::from_millis(1500),
                early_stop: None,
                final_top_k: 60,
                budget: Duration::from_millis(8000),
            },
        }
    }
}

// ============================================================================
// Bounded Merge
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF32(f32);

impl Eq for OrdF32 {}

impl PartialOrd for OrdF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    distance: OrdF32,
    collection_id: String,
    doc_id: String,
}

impl RankKey {
    fn for_candidate(candidate: &Candidate) -> Self {
        Self {
            distance: OrdF32(candidate.raw_distance),
            collection_id: candidate.collection_id.clone(),
            doc_id: candidate.doc_id.clone(),
        }
    }
}

/// Bounded merge of shard results, keyed by raw distance.
///
/// Holds at most `capacity` candidates. Duplicate doc ids collapse keeping
/// the lower distance. Distance ties break by collection id then doc id
/// ascending, so extraction order is stable and testable.
pub struct MergeBuffer {
    capacity: usize,
    by_rank: BTreeMap<RankKey, Candidate>,
    by_doc: HashMap<String, RankKey>,
}

impl MergeBuffer {
    /// Create a merge buffer holding at most `capacity` candidates.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_rank: BTreeMap::new(),
            by_doc: HashMap::new(),
        }
    }

    /// Offer one candidate.
    pub fn insert(&mut self, candidate: Candidate) {
        let key = RankKey::for_candidate(&candidate);

        if let Some(existing) = self.by_doc.get(&candidate.doc_id) {
            if key < *existing {
                self.by_rank.remove(existing);
                self.by_doc.insert(candidate.doc_id.clone(), key.clone());
                self.by_rank.insert(key, candidate);
            }
            return;
        }

        if self.by_rank.len() >= self.capacity {
            // Reject anything no better than the current worst entry.
            let worst = self
                .by_rank
                .last_key_value()
                .map(|(k, _)| k.clone())
                .expect("non-empty buffer at capacity");
            if key >= worst {
                return;
            }
            if let Some((_, evicted)) = self.by_rank.pop_last() {
                self.by_doc.remove(&evicted.doc_id);
            }
        }

        self.by_doc.insert(candidate.doc_id.clone(), key.clone());
        self.by_rank.insert(key, candidate);
    }

    /// Number of candidates currently held.
    pub fn len(&self) -> usize {
        self.by_rank.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.by_rank.is_empty()
    }

    /// Consume the buffer, yielding candidates in ascending distance order.
    pub fn into_ranked(self) -> Vec<Candidate> {
        self.by_rank.into_values().collect()
    }
}

// ============================================================================
// Retrieval Outcome
// ============================================================================

/// The merged result of one retrieval pass.
#[derive(Debug)]
pub struct RetrievalOutcome {
    /// Merged candidates, ascending by raw distance.
    pub candidates: Vec<Candidate>,
    /// Shards selected for dispatch (`min(cap, available)`).
    pub shards_selected: usize,
    /// Shard queries that ran to completion (ok or failed).
    pub shards_queried: usize,
    /// Shard queries that failed or timed out.
    pub shards_failed: usize,
    /// Whether the budget expired or every shard failed.
    pub deadline_exceeded: bool,
}

enum ShardOutcome {
    Completed(Vec<Candidate>),
    Failed,
    Skipped,
}

// ============================================================================
// Retriever
// ============================================================================

/// Deadline-bounded retrieval over a unified or sharded store.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    shard_cache: ShardListCache,
    unified_collection: Option<String>,
    /// Process-wide cap on in-flight upstream requests, shared with the
    /// other pipeline stages.
    upstream: Arc<Semaphore>,
}

impl Retriever {
    /// Create a retriever. `unified_collection` selects the unified path
    /// when present; otherwise the store is treated as sharded.
    pub fn new(
        store: Arc<dyn VectorStore>,
        shard_list_ttl: Duration,
        unified_collection: Option<String>,
        upstream: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            shard_cache: ShardListCache::new(shard_list_ttl),
            unified_collection,
            upstream,
        }
    }

    /// Whether the unified path is active.
    pub fn is_unified(&self) -> bool {
        self.unified_collection.is_some()
    }

    /// Current cached shard list regardless of freshness, for observability.
    pub fn cached_shards(&self) -> Option<Arc<CachedShardList>> {
        self.shard_cache.get_stale()
    }

    /// The cached shard list, refreshing it from the store when missing or
    /// expired. On a fetch failure a stale cached list is used; with no
    /// cached list at all the store outage surfaces.
    pub async fn shard_list(&self, force_refresh: bool) -> Result<Arc<CachedShardList>> {
        if !force_refresh {
            if let Some(cached) = self.shard_cache.get() {
                return Ok(cached);
            }
        }

        match self.store.list_collections().await {
            Ok(collections) => {
                let mut shards: Vec<CollectionInfo> = collections
                    .into_iter()
                    .filter(CollectionInfo::is_corpus_shard)
                    .collect();
                shards.sort_by(|a, b| a.name.cmp(&b.name));
                tracing::debug!(shard_count = shards.len(), "refreshed shard list");
                Ok(self.shard_cache.replace(shards))
            }
            Err(err) => match self.shard_cache.get_stale() {
                Some(stale) => {
                    tracing::warn!(error = %err, "shard list refresh failed, using cached list");
                    Ok(stale)
                }
                None => Err(match err {
                    AppError::VectorStoreUnavailable(_) => err,
                    other => AppError::VectorStoreUnavailable(other.to_string()),
                }),
            },
        }
    }

    /// Retrieve candidates for a question.
    pub async fn retrieve(
        &self,
        question: &Question,
        embedding: &[f32],
    ) -> Result<RetrievalOutcome> {
        let params = FanoutParams::for_mode(question.mode);
        match &self.unified_collection {
            Some(collection_id) => {
                self.retrieve_unified(collection_id, question, embedding, &params)
                    .await
            }
            None => self.retrieve_sharded(question, embedding, &params).await,
        }
    }

    async fn retrieve_unified(
        &self,
        collection_id: &str,
        question: &Question,
        embedding: &[f32],
        params: &FanoutParams,
    ) -> Result<RetrievalOutcome> {
        let remaining = question.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(RetrievalOutcome {
                candidates: Vec::new(),
                shards_selected: 1,
                shards_queried: 0,
                shards_failed: 0,
                deadline_exceeded: true,
            });
        }

        let _permit = self.upstream.acquire().await.map_err(|_| {
            AppError::Internal("upstream request limiter closed".to_string())
        })?;

        match self
            .store
            .query_collection(collection_id, embedding, params.final_top_k, remaining)
            .await
        {
            Ok(candidates) => {
                let mut merge = MergeBuffer::new(params.final_top_k);
                for candidate in candidates {
                    merge.insert(candidate);
                }
                Ok(RetrievalOutcome {
                    candidates: merge.into_ranked(),
                    shards_selected: 1,
                    shards_queried: 1,
                    shards_failed: 0,
                    deadline_exceeded: false,
                })
            }
            Err(err @ AppError::VectorStoreUnavailable(_)) => Err(err),
            Err(err) => {
                tracing::warn!(trace_id = %question.trace_id, error = %err, "unified query failed");
                Ok(RetrievalOutcome {
                    candidates: Vec::new(),
                    shards_selected: 1,
                    shards_queried: 1,
                    shards_failed: 1,
                    deadline_exceeded: true,
                })
            }
        }
    }

    async fn retrieve_sharded(
        &self,
        question: &Question,
        embedding: &[f32],
        params: &FanoutParams,
    ) -> Result<RetrievalOutcome> {
        let shard_list = self.shard_list(false).await?;
        let selected = Self::select_shards(&shard_list.shards, params.shard_cap);
        if selected.is_empty() {
            return Ok(RetrievalOutcome {
                candidates: Vec::new(),
                shards_selected: 0,
                shards_queried: 0,
                shards_failed: 0,
                deadline_exceeded: false,
            });
        }
        let shards_selected = selected.len();

        let cancel = Arc::new(AtomicBool::new(false));
        let workers = Arc::new(Semaphore::new(FANOUT_WORKERS.min(selected.len())));
        let embedding: Arc<Vec<f32>> = Arc::new(embedding.to_vec());
        let deadline = question.deadline;

        let mut tasks = JoinSet::new();
        for shard in selected {
            let store = Arc::clone(&self.store);
            let workers = Arc::clone(&workers);
            let upstream = Arc::clone(&self.upstream);
            let cancel = Arc::clone(&cancel);
            let embedding = Arc::clone(&embedding);
            let shard_id = shard.id.clone();
            let k = params.k_per_shard;
            let per_shard_timeout = params.per_shard_timeout;

            tasks.spawn(async move {
                let Ok(_worker) = workers.acquire_owned().await else {
                    return ShardOutcome::Skipped;
                };
                if cancel.load(Ordering::Relaxed) {
                    return ShardOutcome::Skipped;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return ShardOutcome::Skipped;
                }
                let Ok(_upstream) = upstream.acquire_owned().await else {
                    return ShardOutcome::Skipped;
                };
                if cancel.load(Ordering::Relaxed) {
                    return ShardOutcome::Skipped;
                }

                let timeout = per_shard_timeout.min(remaining);
                match store
                    .query_collection(&shard_id, &embedding, k, timeout)
                    .await
                {
                    Ok(candidates) => ShardOutcome::Completed(candidates),
                    Err(AppError::VectorStoreUnavailable(msg)) => {
                        tracing::warn!(shard_id, error = %msg, "shard unavailable");
                        ShardOutcome::Failed
                    }
                    Err(err) => {
                        tracing::warn!(shard_id, error = %err, "shard query failed");
                        ShardOutcome::Failed
                    }
                }
            });
        }

        let mut merge = MergeBuffer::new(params.final_top_k);
        let mut received = 0usize;
        let mut shards_queried = 0usize;
        let mut shards_failed = 0usize;
        let mut deadline_exceeded = false;

        let tokio_deadline = tokio::time::Instant::from_std(deadline);
        loop {
            let joined = match tokio::time::timeout_at(tokio_deadline, tasks.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Budget exhausted: keep the best-so-far merge and stop.
                    deadline_exceeded = true;
                    cancel.store(true, Ordering::Relaxed);
                    tasks.abort_all();
                    break;
                }
            };

            let Some(task_result) = joined else {
                break;
            };

            match task_result {
                Ok(ShardOutcome::Completed(candidates)) => {
                    shards_queried += 1;
                    received += candidates.len();
                    for candidate in candidates {
                        merge.insert(candidate);
                    }
                    if let Some(threshold) = params.early_stop {
                        if received >= threshold {
                            cancel.store(true, Ordering::Relaxed);
                            tasks.abort_all();
                            break;
                        }
                    }
                }
                Ok(ShardOutcome::Failed) => {
                    shards_queried += 1;
                    shards_failed += 1;
                }
                Ok(ShardOutcome::Skipped) => {}
                // Aborted tasks surface as join errors; they did no work.
                Err(_) => {}
            }
        }

        if shards_queried > 0 && shards_queried == shards_failed {
            deadline_exceeded = true;
        }

        tracing::debug!(
            trace_id = %question.trace_id,
            shards_queried,
            shards_failed,
            merged = merge.len(),
            deadline_exceeded,
            "fan-out complete"
        );

        Ok(RetrievalOutcome {
            candidates: merge.into_ranked(),
            shards_selected,
            shards_queried,
            shards_failed,
            deadline_exceeded,
        })
    }

    /// Deterministic shard selection: the list is kept sorted by name, and
    /// the cap takes a prefix of it. Repeated queries see the same shards.
    fn select_shards(shards: &[CollectionInfo], cap: Option<usize>) -> Vec<CollectionInfo> {
        match cap {
            Some(cap) => shards.iter().take(cap).cloned().collect(),
            None => shards.to_vec(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
