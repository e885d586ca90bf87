use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    catalog::{Catalog, settings},
    chunking::Chunk,
    data_dir::DataDir,
    embedding::Embedder,
    error::{Error, Result},
    retriever::FallbackSearcher,
    tantivy_index::LexicalIndex,
    vector_store::{FlatIndex, VectorStore},
};

/// Read-only, in-memory view of the persisted index state.
///
/// Built from the canonical stores and never mutated afterwards. The
/// catalog generation it was built at is kept so a holder can tell when an
/// indexing run has moved the canonical state on.
pub struct IndexSnapshot {
    generation: u64,
    chunks: Arc<HashMap<String, Chunk>>,
    vector_chunks: Arc<HashMap<u64, String>>,
    vectors: Option<Arc<FlatIndex>>,
    lexical: Option<LexicalIndex>,
    embedding_model: Option<String>,
    dimension: Option<usize>,
}

impl IndexSnapshot {
    /// Load every artifact, failing with [`Error::MissingIndex`] if any of
    /// them is absent.
    pub fn load(data_dir: &DataDir) -> Result<Self> {
        data_dir.require_index()?;
        Self::load_parts(data_dir, true)
    }

    /// Load whatever is present. Only a missing catalog, or a catalog with
    /// neither index beside it, is an error.
    pub fn load_available(data_dir: &DataDir) -> Result<Self> {
        let catalog_path = data_dir.catalog_db();
        if !catalog_path.exists() {
            return Err(Error::MissingIndex {
                artifact: "catalog",
                path: catalog_path,
            });
        }
        Self::load_parts(data_dir, false)
    }

    fn load_parts(data_dir: &DataDir, strict: bool) -> Result<Self> {
        let (generation, chunk_list, vector_ids, embedding_model, dimension) = {
            let catalog = Catalog::open(&data_dir.catalog_db())?;
            let dimension = catalog
                .get_setting(settings::INDEXED_DIMENSION)?
                .and_then(|d| d.parse::<usize>().ok());
            (
                catalog.generation()?,
                catalog.list_chunks()?,
                catalog.vector_ids()?,
                catalog.get_setting(settings::INDEXED_MODEL)?,
                dimension,
            )
        };

        let chunks: HashMap<String, Chunk> = chunk_list
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let vector_chunks: HashMap<u64, String> = vector_ids
            .into_iter()
            .filter(|(chunk_id, _)| chunks.contains_key(chunk_id))
            .map(|(chunk_id, vector_id)| (vector_id, chunk_id))
            .collect();

        let vectors = match Self::load_vectors(data_dir, &vector_chunks) {
            Ok(index) => Some(Arc::new(index)),
            Err(e) if !strict => {
                warn!(error = %e, "vector index unavailable");
                None
            }
            Err(e) => return Err(e),
        };

        let lexical = match LexicalIndex::open_existing(&data_dir.tantivy_dir()) {
            Ok(index) => Some(index),
            Err(e) if !strict => {
                warn!(error = %e, "lexical index unavailable");
                None
            }
            Err(e) => return Err(e),
        };

        if vectors.is_none() && lexical.is_none() {
            return Err(Error::MissingIndex {
                artifact: "vector index",
                path: data_dir.vectors_db(),
            });
        }

        info!(
            generation,
            chunks = chunks.len(),
            vectors = vectors.as_ref().map(|v| v.len()).unwrap_or(0),
            lexical = lexical.is_some(),
            "loaded index snapshot"
        );

        Ok(Self {
            generation,
            chunks: Arc::new(chunks),
            vector_chunks: Arc::new(vector_chunks),
            vectors,
            lexical,
            embedding_model,
            dimension,
        })
    }

    /// Vectors with no chunk mapping are left out of the search index.
    fn load_vectors(
        data_dir: &DataDir,
        vector_chunks: &HashMap<u64, String>,
    ) -> Result<FlatIndex> {
        let path = data_dir.vectors_db();
        if !path.exists() {
            return Err(Error::MissingIndex {
                artifact: "vector index",
                path,
            });
        }
        let store = VectorStore::open(&path)?;
        let (mapped, orphans): (Vec<_>, Vec<_>) = store
            .load_all()?
            .into_iter()
            .partition(|(id, _)| vector_chunks.contains_key(id));
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "ignoring unmapped vectors");
        }
        Ok(FlatIndex::from_vectors(mapped))
    }

    /// Assemble a snapshot from in-memory parts.
    ///
    /// `vectors` pairs each vector id with the chunk id it embeds.
    pub fn from_parts(
        chunks: Vec<Chunk>,
        vectors: Option<Vec<(u64, String, Vec<f32>)>>,
        lexical: Option<LexicalIndex>,
    ) -> Self {
        let chunks: HashMap<String, Chunk> =
            chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        let mut vector_chunks = HashMap::new();
        let vectors = vectors.map(|entries| {
            let mut rows = Vec::with_capacity(entries.len());
            for (vector_id, chunk_id, vector) in entries {
                vector_chunks.insert(vector_id, chunk_id);
                rows.push((vector_id, vector));
            }
            Arc::new(FlatIndex::from_vectors(rows))
        });
        let dimension = vectors.as_ref().map(|v| v.dimension());

        Self {
            generation: 0,
            chunks: Arc::new(chunks),
            vector_chunks: Arc::new(vector_chunks),
            vectors,
            lexical,
            embedding_model: None,
            dimension,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn vectors(&self) -> Option<&FlatIndex> {
        self.vectors.as_deref()
    }

    pub fn chunk_for_vector(&self, vector_id: u64) -> Option<&Chunk> {
        self.vector_chunks
            .get(&vector_id)
            .and_then(|id| self.chunks.get(id))
    }

    pub fn lexical(&self) -> Option<&LexicalIndex> {
        self.lexical.as_ref()
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    /// A raw vector searcher sharing this snapshot's data, or `None` when
    /// the vector index was not loaded.
    pub fn fallback(&self) -> Option<FallbackSearcher> {
        self.vectors.as_ref().map(|vectors| {
            FallbackSearcher::new(
                Arc::clone(vectors),
                Arc::clone(&self.vector_chunks),
                Arc::clone(&self.chunks),
            )
        })
    }

    /// Verify that `embedder` produces vectors comparable with the stored
    /// ones.
    pub fn check_embedder(&self, embedder: &dyn Embedder) -> Result<()> {
        if let Some(indexed) = &self.embedding_model
            && indexed != embedder.model_id()
        {
            return Err(Error::Config(format!(
                "index was built with embedding model '{indexed}' but '{}' \
                 is loaded; re-run `vedarag index` or select the same model",
                embedder.model_id()
            )));
        }
        if let Some(dimension) = self.dimension
            && self.vectors.as_ref().is_some_and(|v| !v.is_empty())
            && dimension != embedder.dimension()
        {
            return Err(Error::Config(format!(
                "index vectors have dimension {dimension} but the embedding \
                 model produces {}",
                embedder.dimension()
            )));
        }
        Ok(())
    }

    /// Whether the catalog has moved past this snapshot's generation.
    pub fn is_stale(&self, data_dir: &DataDir) -> Result<bool> {
        let catalog = Catalog::open(&data_dir.catalog_db())?;
        Ok(catalog.generation()? != self.generation)
    }
}

impl std::fmt::Debug for IndexSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSnapshot")
            .field("generation", &self.generation)
            .field("chunks", &self.chunks.len())
            .field("vectors", &self.vectors.as_ref().map(|v| v.len()))
            .field("lexical", &self.lexical.is_some())
            .finish_non_exhaustive()
    }
}
