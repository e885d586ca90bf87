//! Deterministic stand-ins for the neural models.
//!
//! [`HashingEmbedder`] projects word unigrams into a fixed number of
//! buckets (the feature-hashing trick) and [`TermOverlapScorer`] scores a
//! passage by the share of query terms it contains. Neither needs model
//! weights, so they back offline runs and tests.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::{embedding::Embedder, error::Result, reranker::RelevanceScorer};

pub const HASHING_EMBEDDER_ID: &str = "vedarag/hashing-embedder-v1";
pub const TERM_OVERLAP_SCORER_ID: &str = "vedarag/term-overlap-v1";
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "for", "from",
    "have", "how", "i", "if", "in", "is", "it", "may", "me", "my", "not",
    "of", "on", "or", "should", "that", "the", "this", "to", "us", "we",
    "what", "when", "which", "will", "with", "yet", "you", "your",
];

/// Lowercased alphanumeric terms of `text`, stop words removed.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// 64-bit FNV-1a. Stable across builds, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for term in terms(text) {
            let h = fnv1a(term.as_bytes());
            let idx = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        HASHING_EMBEDDER_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.par_iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TermOverlapScorer;

impl RelevanceScorer for TermOverlapScorer {
    fn model_id(&self) -> &str {
        TERM_OVERLAP_SCORER_ID
    }

    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let query_terms: HashSet<String> = terms(query).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        Ok(passages
            .par_iter()
            .map(|passage| {
                let passage_terms: HashSet<String> =
                    terms(passage).into_iter().collect();
                let hits = query_terms
                    .iter()
                    .filter(|t| passage_terms.contains(*t))
                    .count();
                hits as f32 / query_terms.len() as f32
            })
            .collect())
    }
}
