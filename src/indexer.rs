use std::collections::{HashMap, HashSet};

use kdam::{BarExt, tqdm};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    catalog::{Catalog, settings},
    chunk_log::ChunkLog,
    chunking::Chunk,
    data_dir::DataDir,
    embedding::{Embedder, embed_normalized},
    error::{Error, Result},
    tantivy_index::{LexicalIndex, WRITER_MEMORY_BUDGET},
    text_util::{content_hash, word_count},
    vector_store::VectorStore,
};

pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Chunks embedded and committed per transaction.
    pub batch_size: usize,
    /// Remove indexed chunks whose ids are no longer in the input.
    pub prune: bool,
    /// Draw a progress bar on stderr.
    pub progress: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            prune: false,
            progress: false,
        }
    }
}

/// What an indexing run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Records without an id or text, skipped.
    pub invalid: usize,
    /// Chunks whose vectors were (re)computed.
    pub embedded: usize,
    /// Chunks whose stored hash matched and were left alone.
    pub unchanged: usize,
    /// Chunks written to the lexical index.
    pub lexical_updated: usize,
    pub pruned: usize,
    /// Vectors with no chunk mapping, left behind by an interrupted run.
    pub orphans_removed: usize,
    pub generation: u64,
}

/// The three persisted stores an indexing run writes to.
pub struct IndexStores {
    pub catalog: Catalog,
    pub vectors: VectorStore,
    pub lexical: LexicalIndex,
}

impl IndexStores {
    /// Open the stores under `data_dir`, creating any that are missing.
    pub fn open(data_dir: &DataDir) -> Result<Self> {
        Ok(Self {
            catalog: Catalog::open(&data_dir.catalog_db())?,
            vectors: VectorStore::open(&data_dir.vectors_db())?,
            lexical: LexicalIndex::open(&data_dir.tantivy_dir())?,
        })
    }
}

/// Index everything in the data directory's chunk log.
pub fn index_data_dir(
    data_dir: &DataDir,
    embedder: &dyn Embedder,
    options: IndexOptions,
) -> Result<IndexReport> {
    let log = ChunkLog::new(data_dir.chunk_log());
    if !log.exists() {
        return Err(Error::NotFound {
            kind: "chunk metadata",
            name: format!("{} (run `vedarag chunk` first)", log.path().display()),
        });
    }
    let contents = log.read()?;
    if contents.skipped > 0 {
        warn!(skipped = contents.skipped, "chunk log had malformed records");
    }

    let stores = IndexStores::open(data_dir)?;
    index_chunks(contents.chunks, &stores, embedder, options)
}

/// Bring both indexes in line with `chunks`.
///
/// Only chunks whose content hash differs from the one recorded at their
/// last embedding are re-embedded. Each gets a fresh vector id above every
/// id assigned before; the vector it replaces is deleted once the catalog
/// points at the new one. Every batch is committed on its own, so an
/// interrupted run keeps the batches it finished.
pub fn index_chunks(
    chunks: Vec<Chunk>,
    stores: &IndexStores,
    embedder: &dyn Embedder,
    options: IndexOptions,
) -> Result<IndexReport> {
    let IndexStores {
        catalog,
        vectors,
        lexical,
    } = stores;
    let mut report = IndexReport::default();

    let chunks = sanitize(chunks, &mut report);
    let incoming: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

    // Highest id ever handed out, including ids of vectors an interrupted
    // run stored but never recorded.
    let stored_ids = vectors.list_ids()?;
    let mut next_id = catalog
        .max_vector_id()?
        .max(stored_ids.iter().copied().max().unwrap_or(0))
        + 1;

    let mut vector_ids = catalog.vector_ids()?;
    report.orphans_removed = remove_orphans(vectors, &stored_ids, &vector_ids)?;

    let mut writer = lexical.writer(WRITER_MEMORY_BUDGET)?;

    if options.prune {
        let mut stale: HashSet<String> = catalog
            .content_hashes()?
            .into_keys()
            .chain(catalog.lexical_hashes()?.into_keys())
            .filter(|id| !incoming.contains(id.as_str()))
            .collect();
        stale.extend(
            vector_ids
                .keys()
                .filter(|id| !incoming.contains(id.as_str()))
                .cloned(),
        );
        if !stale.is_empty() {
            let stale: Vec<String> = stale.into_iter().collect();
            for id in &stale {
                lexical.delete(&writer, id);
            }
            writer.commit()?;
            catalog.remove_chunks(&stale)?;
            let dropped: Vec<u64> =
                stale.iter().filter_map(|id| vector_ids.remove(id)).collect();
            vectors.remove_batch(&dropped)?;
            info!(count = stale.len(), "pruned chunks missing from the input");
            report.pruned = stale.len();
        }
    }

    // A different embedding model makes every stored vector incomparable.
    let indexed_model = catalog.get_setting(settings::INDEXED_MODEL)?;
    let model_changed = indexed_model
        .as_deref()
        .is_some_and(|m| m != embedder.model_id());
    if model_changed {
        warn!(
            previous = indexed_model.as_deref().unwrap_or_default(),
            current = embedder.model_id(),
            "embedding model changed; re-embedding every chunk"
        );
    }

    let stored_hashes = if model_changed {
        HashMap::new()
    } else {
        catalog.content_hashes()?
    };
    let to_embed: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| {
            stored_hashes.get(&c.id) != Some(&c.content_hash)
                || !vector_ids.contains_key(&c.id)
        })
        .collect();
    report.unchanged = chunks.len() - to_embed.len();

    if !to_embed.is_empty() {
        info!(
            new_or_changed = to_embed.len(),
            unchanged = report.unchanged,
            "embedding chunks"
        );
    }

    let mut bar = options
        .progress
        .then(|| tqdm!(total = to_embed.len(), desc = "Embedding"));

    for batch in to_embed.chunks(options.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_normalized(embedder, &texts, texts.len(), |_| {})?;

        let mut entries = Vec::with_capacity(batch.len());
        let mut records = Vec::with_capacity(batch.len());
        let mut replaced = Vec::new();
        for (chunk, vector) in batch.iter().zip(embeddings) {
            let id = next_id;
            next_id += 1;
            entries.push((id, vector));
            records.push((*chunk, id));
            if let Some(old) = vector_ids.insert(chunk.id.clone(), id) {
                replaced.push(old);
            }
        }

        vectors.store_batch(&entries)?;
        let generation = catalog.commit_embedded(&records)?;
        vectors.remove_batch(&replaced)?;

        report.embedded += batch.len();
        debug!(
            batch = batch.len(),
            replaced = replaced.len(),
            generation,
            "committed embedding batch"
        );
        if let Some(bar) = bar.as_mut() {
            bar.update(batch.len())?;
        }
    }
    if bar.is_some() {
        eprintln!();
    }

    if report.embedded > 0 || indexed_model.is_none() {
        catalog.set_setting(settings::INDEXED_MODEL, embedder.model_id())?;
        catalog.set_setting(
            settings::INDEXED_DIMENSION,
            &embedder.dimension().to_string(),
        )?;
    }

    report.lexical_updated = update_lexical(catalog, lexical, &mut writer, &chunks)?;
    report.generation = catalog.generation()?;

    info!(
        embedded = report.embedded,
        unchanged = report.unchanged,
        lexical = report.lexical_updated,
        pruned = report.pruned,
        generation = report.generation,
        "indexing finished"
    );
    Ok(report)
}

/// Drop records with no id or no text and recompute derived fields from
/// the text, so a hand-edited log cannot carry a stale hash.
fn sanitize(chunks: Vec<Chunk>, report: &mut IndexReport) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter_map(|mut chunk| {
            if chunk.id.trim().is_empty() || chunk.text.trim().is_empty() {
                warn!(chunk_id = %chunk.id, "skipping chunk without id or text");
                report.invalid += 1;
                return None;
            }
            chunk.content_hash = content_hash(&chunk.text);
            chunk.word_count = word_count(&chunk.text);
            Some(chunk)
        })
        .collect()
}

fn remove_orphans(
    vectors: &VectorStore,
    stored_ids: &[u64],
    vector_ids: &HashMap<String, u64>,
) -> Result<usize> {
    let mapped: HashSet<u64> = vector_ids.values().copied().collect();
    let orphans: Vec<u64> = stored_ids
        .iter()
        .copied()
        .filter(|id| !mapped.contains(id))
        .collect();
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "removing vectors with no chunk mapping");
        vectors.remove_batch(&orphans)?;
    }
    Ok(orphans.len())
}

/// Upsert chunks whose lexical entry is missing or was built from other
/// text, then record the hashes now in the index.
fn update_lexical(
    catalog: &Catalog,
    lexical: &LexicalIndex,
    writer: &mut tantivy::IndexWriter,
    chunks: &[Chunk],
) -> Result<usize> {
    let recorded = catalog.lexical_hashes()?;
    // The recorded hashes can only be trusted while the index still holds
    // as many documents as were recorded.
    let verify = lexical.num_docs()? != recorded.len() as u64;
    if verify {
        debug!("lexical index out of step with catalog; checking every chunk");
    }

    let mut pending = Vec::new();
    for chunk in chunks {
        let current = recorded.get(&chunk.id) == Some(&chunk.content_hash);
        if current && (!verify || lexical.contains(&chunk.id)?) {
            continue;
        }
        lexical.upsert(writer, chunk)?;
        pending.push((chunk.id.as_str(), chunk.content_hash.as_str()));
    }

    if pending.is_empty() {
        return Ok(0);
    }
    writer.commit()?;
    lexical.refresh()?;
    catalog.commit_lexical(&pending)?;
    Ok(pending.len())
}
