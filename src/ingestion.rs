use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::{
    chunk_log::ChunkLog,
    chunking::{Chunk, Chunker},
    corpus::load_corpus,
    error::Result,
};

/// What a chunking run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents found under the input directory.
    pub documents: usize,
    /// Documents already present in the log and left alone.
    pub already_chunked: usize,
    /// Chunks appended to the log.
    pub chunks: usize,
}

/// Chunk every document under `input` and append the chunks to `log`.
///
/// Documents whose id already appears in the log are skipped, so an
/// interrupted run can be resumed. With `rechunk` the log is truncated
/// first and everything is chunked again.
pub fn ingest_corpus(
    input: &Path,
    log: &ChunkLog,
    chunker: &Chunker,
    rechunk: bool,
) -> Result<IngestReport> {
    if rechunk {
        log.reset()?;
    }
    let known = log.read()?.doc_ids();
    let documents = load_corpus(input)?;

    let pending: Vec<_> = documents
        .iter()
        .filter(|doc| !known.contains(&doc.doc_id))
        .collect();
    let already_chunked = documents.len() - pending.len();

    // Chunk in parallel, append in input order.
    let chunked: Vec<Vec<Chunk>> =
        pending.par_iter().map(|doc| chunker.chunk(doc)).collect();

    let mut report = IngestReport {
        documents: documents.len(),
        already_chunked,
        chunks: 0,
    };
    for (doc, chunks) in pending.iter().zip(&chunked) {
        log.append(chunks)?;
        report.chunks += chunks.len();
        info!(doc_id = %doc.doc_id, chunks = chunks.len(), "chunked document");
    }

    Ok(report)
}
