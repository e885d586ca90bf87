use crate::{error::Result, vector_store::normalize};

/// Encodes text into fixed-dimension dense vectors.
///
/// Implementations are built once at startup and shared behind an `Arc`;
/// `embed` takes `&self` so concurrent queries can encode without locking.
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside the index so a query embedder can be
    /// checked against the one the vectors were built with.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Encode a batch of texts. Output order matches input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Encode `texts` in batches of `batch_size`, normalizing every vector.
///
/// `on_batch` is called with the number of texts finished after each batch.
pub fn embed_normalized(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    mut on_batch: impl FnMut(usize),
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        for mut vector in embedder.embed(batch)? {
            normalize(&mut vector);
            out.push(vector);
        }
        on_batch(batch.len());
    }
    Ok(out)
}

/// Encode and normalize a single query.
pub fn embed_query(embedder: &dyn Embedder, query: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[query.to_string()])?;
    let mut vector = vectors.pop().ok_or_else(|| {
        crate::error::Error::Model("embedder returned no vector".into())
    })?;
    normalize(&mut vector);
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing_model::HashingEmbedder;

    #[test]
    fn embed_normalized_batches_and_normalizes() {
        let embedder = HashingEmbedder::new(64);
        let texts: Vec<String> = (0..5).map(|i| format!("herb number {i}")).collect();
        let mut progress = Vec::new();

        let vectors =
            embed_normalized(&embedder, &texts, 2, |n| progress.push(n)).unwrap();

        assert_eq!(vectors.len(), 5);
        assert_eq!(progress, vec![2, 2, 1]);
        for v in &vectors {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn embed_query_matches_batch_encoding() {
        let embedder = HashingEmbedder::new(64);
        let q = embed_query(&embedder, "cooling foods").unwrap();
        let batch = embed_normalized(&embedder, &["cooling foods".to_string()], 8, |_| {})
            .unwrap();
        assert_eq!(q, batch[0]);
    }
}
