use std::{collections::HashMap, path::Path};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use tracing::warn;

use crate::{chunking::Chunk, error::Result};

/// chunk id -> chunk record as JSON.
const CHUNKS: TableDefinition<&str, &str> = TableDefinition::new("chunks");
/// chunk id -> vector id in the vector store.
const CHUNK_VECTORS: TableDefinition<&str, u64> =
    TableDefinition::new("chunk_vectors");
/// chunk id -> content hash of the embedded text.
const CHUNK_HASHES: TableDefinition<&str, &str> =
    TableDefinition::new("chunk_hashes");
/// chunk id -> content hash of the text in the lexical index.
const LEXICAL_HASHES: TableDefinition<&str, &str> =
    TableDefinition::new("lexical_hashes");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const GENERATION: &str = "generation";
const MAX_VECTOR_ID: &str = "max_vector_id";

/// Setting keys stored in the catalog.
pub mod settings {
    /// Embedding model configured with `vedarag model set`.
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    /// Cross-encoder configured with `vedarag model set --rerank`.
    pub const RERANK_MODEL: &str = "rerank_model";
    /// Embedding model the stored vectors were produced with.
    pub const INDEXED_MODEL: &str = "indexed_embedding_model";
    /// Vector dimension of the stored vectors.
    pub const INDEXED_DIMENSION: &str = "indexed_embedding_dimension";
}

/// Canonical bookkeeping for the dual index.
///
/// Holds the chunk table, the chunk to vector id map, the content hashes
/// each index was built from, settings, and two counters: the highest
/// vector id ever assigned and a generation number bumped on every commit
/// that changes indexed content.
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(CHUNK_VECTORS)?;
        txn.open_table(CHUNK_HASHES)?;
        txn.open_table(LEXICAL_HASHES)?;
        txn.open_table(SETTINGS)?;
        txn.open_table(COUNTERS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Chunks --

    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        match table.get(id)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    /// All stored chunks. Records that fail to decode are logged and
    /// skipped.
    pub fn list_chunks(&self) -> Result<Vec<Chunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            match serde_json::from_str::<Chunk>(v.value()) {
                Ok(chunk) => result.push(chunk),
                Err(e) => warn!(
                    chunk_id = k.value(),
                    error = %e,
                    "skipping unreadable chunk record"
                ),
            }
        }
        Ok(result)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    // -- Index bookkeeping --

    pub fn vector_ids(&self) -> Result<HashMap<String, u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNK_VECTORS)?;
        let mut result = HashMap::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.insert(k.value().to_string(), v.value());
        }
        Ok(result)
    }

    pub fn content_hashes(&self) -> Result<HashMap<String, String>> {
        self.read_hashes(CHUNK_HASHES)
    }

    pub fn lexical_hashes(&self) -> Result<HashMap<String, String>> {
        self.read_hashes(LEXICAL_HASHES)
    }

    fn read_hashes(
        &self,
        def: TableDefinition<'static, &'static str, &'static str>,
    ) -> Result<HashMap<String, String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(def)?;
        let mut result = HashMap::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.insert(k.value().to_string(), v.value().to_string());
        }
        Ok(result)
    }

    /// Highest vector id ever assigned, or 0 when none has been.
    pub fn max_vector_id(&self) -> Result<u64> {
        self.counter(MAX_VECTOR_ID)
    }

    /// Current index generation. Starts at 0 and only grows.
    pub fn generation(&self) -> Result<u64> {
        self.counter(GENERATION)
    }

    fn counter(&self, key: &str) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COUNTERS)?;
        Ok(table.get(key)?.map(|v| v.value()).unwrap_or(0))
    }

    /// Record a batch of freshly embedded chunks in one transaction.
    ///
    /// Stores each chunk, its new vector id and the hash it was embedded
    /// from, raises the vector id high-water mark and bumps the generation.
    /// Returns the new generation.
    pub fn commit_embedded(&self, batch: &[(&Chunk, u64)]) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let mut high_water = 0;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut vectors = txn.open_table(CHUNK_VECTORS)?;
            let mut hashes = txn.open_table(CHUNK_HASHES)?;
            for (chunk, vector_id) in batch {
                let json = serde_json::to_string(chunk)?;
                chunks.insert(chunk.id.as_str(), json.as_str())?;
                vectors.insert(chunk.id.as_str(), *vector_id)?;
                hashes.insert(chunk.id.as_str(), chunk.content_hash.as_str())?;
                high_water = high_water.max(*vector_id);
            }
        }
        raise_counter(&txn, MAX_VECTOR_ID, high_water)?;
        let generation = bump_generation(&txn)?;
        txn.commit()?;
        Ok(generation)
    }

    /// Record the content hashes now present in the lexical index.
    pub fn commit_lexical(&self, entries: &[(&str, &str)]) -> Result<u64> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(LEXICAL_HASHES)?;
            for (id, hash) in entries {
                table.insert(*id, *hash)?;
            }
        }
        let generation = bump_generation(&txn)?;
        txn.commit()?;
        Ok(generation)
    }

    /// Remove chunks from every table. Returns the new generation.
    pub fn remove_chunks(&self, ids: &[String]) -> Result<u64> {
        let txn = self.db.begin_write()?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut vectors = txn.open_table(CHUNK_VECTORS)?;
            let mut hashes = txn.open_table(CHUNK_HASHES)?;
            let mut lexical = txn.open_table(LEXICAL_HASHES)?;
            for id in ids {
                chunks.remove(id.as_str())?;
                vectors.remove(id.as_str())?;
                hashes.remove(id.as_str())?;
                lexical.remove(id.as_str())?;
            }
        }
        let generation = bump_generation(&txn)?;
        txn.commit()?;
        Ok(generation)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

fn raise_counter(txn: &WriteTransaction, key: &str, value: u64) -> Result<()> {
    let mut table = txn.open_table(COUNTERS)?;
    let current = table.get(key)?.map(|v| v.value()).unwrap_or(0);
    if value > current {
        table.insert(key, value)?;
    }
    Ok(())
}

fn bump_generation(txn: &WriteTransaction) -> Result<u64> {
    let mut table = txn.open_table(COUNTERS)?;
    let next = table.get(GENERATION)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(GENERATION, next)?;
    Ok(next)
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}
