use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    chunking::Chunk,
    embedding::{Embedder, embed_query},
    error::{Error, Result},
    snapshot::IndexSnapshot,
    vector_store::FlatIndex,
};

/// Which retrieval path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Lexical,
    Semantic,
    Fallback,
}

/// A chunk flowing through retrieval, reranking and selection.
///
/// `rerank_score` is only present once the candidate has been through the
/// reranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub source: RetrievalSource,
    /// BM25 score for lexical hits, inner product for vector hits. Not
    /// comparable across sources.
    pub retrieval_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn new(chunk: Chunk, source: RetrievalSource, retrieval_score: f32) -> Self {
        Self {
            chunk,
            source,
            retrieval_score,
            rerank_score: None,
        }
    }
}

/// Keyword plus vector search over one snapshot.
pub struct HybridRetriever<'a> {
    snapshot: &'a IndexSnapshot,
    embedder: &'a dyn Embedder,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(snapshot: &'a IndexSnapshot, embedder: &'a dyn Embedder) -> Self {
        Self { snapshot, embedder }
    }

    /// Up to `top_k` candidates: keyword hits first, then vector hits whose
    /// text is not already present. The order is not a relevance ranking.
    ///
    /// A keyword query the parser rejects contributes no hits. A subsystem
    /// that is missing or fails is skipped; [`Error::Unavailable`] is
    /// returned only when neither produced a result.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let semantic = match self.semantic_hits(query, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector search failed");
                None
            }
        };
        let lexical = match self.lexical_hits(query, top_k) {
            Ok(hits) => hits,
            Err(Error::QueryParse(e)) => {
                warn!(error = %e, "keyword query rejected; using vector hits only");
                Some(Vec::new())
            }
            Err(e) => {
                warn!(error = %e, "keyword search failed");
                None
            }
        };

        if semantic.is_none() && lexical.is_none() {
            return Err(Error::Unavailable);
        }

        let lexical = lexical.unwrap_or_default();
        let semantic = semantic.unwrap_or_default();
        debug!(
            lexical = lexical.len(),
            semantic = semantic.len(),
            "merging retrieval results"
        );
        Ok(merge(lexical, semantic, top_k))
    }

    fn semantic_hits(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Option<Vec<Candidate>>> {
        let Some(vectors) = self.snapshot.vectors() else {
            return Ok(None);
        };
        let query_vector = embed_query(self.embedder, query)?;
        let k = top_k.min(vectors.len());

        let hits = vectors
            .search(&query_vector, k)?
            .into_iter()
            .filter_map(|(vector_id, score)| {
                let chunk = self.snapshot.chunk_for_vector(vector_id);
                if chunk.is_none() {
                    warn!(vector_id, "vector has no chunk; skipping");
                }
                chunk.map(|c| {
                    Candidate::new(c.clone(), RetrievalSource::Semantic, score)
                })
            })
            .collect();
        Ok(Some(hits))
    }

    fn lexical_hits(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Option<Vec<Candidate>>> {
        let Some(lexical) = self.snapshot.lexical() else {
            return Ok(None);
        };
        let hits = lexical
            .search(query, top_k.saturating_mul(2))?
            .into_iter()
            .filter_map(|hit| {
                let chunk = self.snapshot.chunk(&hit.chunk_id);
                if chunk.is_none() {
                    warn!(chunk_id = %hit.chunk_id, "keyword hit has no chunk; skipping");
                }
                chunk.map(|c| {
                    Candidate::new(c.clone(), RetrievalSource::Lexical, hit.score)
                })
            })
            .collect();
        Ok(Some(hits))
    }
}

/// Deduplicate by passage text, keyword hits first, and cut to `top_k`.
pub fn merge(
    lexical: Vec<Candidate>,
    semantic: Vec<Candidate>,
    top_k: usize,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(top_k);
    for candidate in lexical.into_iter().chain(semantic) {
        if merged.len() == top_k {
            break;
        }
        if seen.insert(candidate.chunk.text.clone()) {
            merged.push(candidate);
        }
    }
    merged
}

/// Vector-only search over a retained copy of the vector index.
///
/// Holds its own references, so it stays usable while the hybrid path is
/// failing or its snapshot is being replaced.
#[derive(Clone)]
pub struct FallbackSearcher {
    vectors: Arc<FlatIndex>,
    vector_chunks: Arc<HashMap<u64, String>>,
    chunks: Arc<HashMap<String, Chunk>>,
}

impl FallbackSearcher {
    pub fn new(
        vectors: Arc<FlatIndex>,
        vector_chunks: Arc<HashMap<u64, String>>,
        chunks: Arc<HashMap<String, Chunk>>,
    ) -> Self {
        Self {
            vectors,
            vector_chunks,
            chunks,
        }
    }

    pub fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        let query_vector = embed_query(embedder, query)?;
        let k = top_k.min(self.vectors.len());
        Ok(self
            .vectors
            .search(&query_vector, k)?
            .into_iter()
            .filter_map(|(vector_id, score)| {
                let chunk = self
                    .vector_chunks
                    .get(&vector_id)
                    .and_then(|id| self.chunks.get(id))?;
                Some(Candidate::new(
                    chunk.clone(),
                    RetrievalSource::Fallback,
                    score,
                ))
            })
            .collect())
    }
}

impl std::fmt::Debug for FallbackSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSearcher")
            .field("vectors", &self.vectors.len())
            .finish_non_exhaustive()
    }
}
