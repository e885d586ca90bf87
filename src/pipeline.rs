use std::sync::{Arc, Mutex, RwLock};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    data_dir::DataDir,
    error::Result,
    model_manager::ModelHandles,
    reranker,
    retriever::{Candidate, FallbackSearcher, HybridRetriever},
    selector::{Selection, SelectionPolicy},
    snapshot::IndexSnapshot,
};

/// Retrieve, rerank and select over a shared index snapshot.
///
/// Query methods never fail: each stage that breaks degrades to the next
/// cheaper path, bottoming out at an empty result.
pub struct RetrievalEngine {
    data_dir: Option<DataDir>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    fallback: RwLock<Option<FallbackSearcher>>,
    // Held while a reload has the catalog open.
    reload_lock: Mutex<()>,
    models: ModelHandles,
    policy: SelectionPolicy,
}

impl RetrievalEngine {
    /// Load the index under `data_dir`. Fails if any artifact is missing or
    /// the embedder does not match the one the index was built with.
    pub fn open(
        data_dir: DataDir,
        models: ModelHandles,
        policy: SelectionPolicy,
    ) -> Result<Self> {
        let snapshot = IndexSnapshot::load(&data_dir)?;
        let mut engine = Self::from_snapshot(snapshot, models, policy)?;
        engine.data_dir = Some(data_dir);
        Ok(engine)
    }

    /// Serve a prebuilt snapshot. Such an engine never reloads.
    pub fn from_snapshot(
        snapshot: IndexSnapshot,
        models: ModelHandles,
        policy: SelectionPolicy,
    ) -> Result<Self> {
        snapshot.check_embedder(models.embedder.as_ref())?;
        let fallback = snapshot.fallback();
        Ok(Self {
            data_dir: None,
            snapshot: RwLock::new(Arc::new(snapshot)),
            fallback: RwLock::new(fallback),
            reload_lock: Mutex::new(()),
            models,
            policy,
        })
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn models(&self) -> &ModelHandles {
        &self.models
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a fresh snapshot if an indexing run has committed since the
    /// current one was loaded. A failed reload keeps the current snapshot.
    /// Returns whether a new snapshot was installed. A call made while
    /// another reload is running returns `false` at once.
    pub fn reload_if_stale(&self) -> bool {
        let Some(data_dir) = &self.data_dir else {
            return false;
        };
        let Ok(_reloading) = self.reload_lock.try_lock() else {
            return false;
        };
        let current = self.snapshot();
        match current.is_stale(data_dir) {
            Ok(false) => return false,
            Ok(true) => {}
            Err(e) => {
                warn!(error = %e, "could not check index generation");
                return false;
            }
        }

        let fresh = IndexSnapshot::load_available(data_dir).and_then(|s| {
            s.check_embedder(self.models.embedder.as_ref())?;
            Ok(s)
        });
        match fresh {
            Ok(snapshot) => {
                info!(
                    from = current.generation(),
                    to = snapshot.generation(),
                    "reloaded index snapshot"
                );
                if let Some(fallback) = snapshot.fallback() {
                    *self
                        .fallback
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                        Some(fallback);
                }
                *self
                    .snapshot
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Arc::new(snapshot);
                true
            }
            Err(e) => {
                warn!(error = %e, "index reload failed; keeping current snapshot");
                false
            }
        }
    }

    /// Hybrid candidates for `query`, at most `top_k`, not ordered by
    /// relevance. Falls back to a plain vector search when the hybrid path
    /// errors or finds nothing.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        if top_k == 0 {
            return Vec::new();
        }
        let snapshot = self.snapshot();
        let embedder = self.models.embedder.as_ref();

        match HybridRetriever::new(&snapshot, embedder).search(query, top_k) {
            Ok(hits) if !hits.is_empty() => return hits,
            Ok(_) => debug!("hybrid search found nothing; trying vector fallback"),
            Err(e) => warn!(error = %e, "hybrid search failed; trying vector fallback"),
        }

        let fallback = self
            .fallback
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(fallback) = fallback else {
            return Vec::new();
        };
        match fallback.search(embedder, query, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector fallback failed");
                Vec::new()
            }
        }
    }

    /// Rerank `candidates` and keep the best `keep_n`. If the relevance
    /// model fails, the first `keep_n` candidates are returned unscored.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        keep_n: usize,
    ) -> Vec<Candidate> {
        // Cloned up front: `rerank` consumes its input.
        let backup: Vec<Candidate> =
            candidates.iter().take(keep_n).cloned().collect();
        match reranker::rerank(query, candidates, keep_n, self.models.scorer.as_ref()) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "reranking failed; keeping retrieval order");
                backup
            }
        }
    }

    pub fn search_and_rerank(
        &self,
        query: &str,
        top_k: usize,
        keep_n: usize,
    ) -> Vec<Candidate> {
        let candidates = self.search(query, top_k);
        self.rerank(query, candidates, keep_n)
    }

    /// Classify the query, retrieve and rerank at the width its class
    /// calls for, and pick the final passages.
    pub fn context<R: Rng + ?Sized>(&self, query: &str, rng: &mut R) -> Selection {
        let class = self.policy.classify(query);
        let budget = self.policy.budget(class);
        debug!(?class, top_k = budget.top_k, keep_n = budget.keep_n, "selecting context");

        let reranked = self.search_and_rerank(query, budget.top_k, budget.keep_n);
        self.policy.select(reranked, class, rng)
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("snapshot", &self.snapshot())
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}
