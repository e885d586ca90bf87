use std::cmp::Ordering;

use crate::{error::Result, retriever::Candidate};

/// Scores `(query, passage)` pairs jointly. Higher means more relevant.
pub trait RelevanceScorer: Send + Sync {
    fn model_id(&self) -> &str;

    /// One score per passage, in input order.
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;
}

/// Re-order candidates by relevance to `query` and keep the best `keep_n`.
///
/// An empty candidate list returns immediately without invoking the model.
/// Ties keep their retrieval order. NaN scores sort last.
pub fn rerank(
    query: &str,
    candidates: Vec<Candidate>,
    keep_n: usize,
    scorer: &dyn RelevanceScorer,
) -> Result<Vec<Candidate>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let passages: Vec<&str> =
        candidates.iter().map(|c| c.chunk.text.as_str()).collect();
    let scores = scorer.score(query, &passages)?;
    if scores.len() != candidates.len() {
        return Err(crate::error::Error::Model(format!(
            "relevance model returned {} scores for {} passages",
            scores.len(),
            candidates.len()
        )));
    }

    let mut ranked: Vec<Candidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|(mut candidate, score)| {
            candidate.rerank_score =
                Some(if score.is_nan() { f32::NEG_INFINITY } else { score });
            candidate
        })
        .collect();

    // sort_by is stable, so equal scores stay in retrieval order.
    ranked.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(keep_n);

    Ok(ranked)
}
