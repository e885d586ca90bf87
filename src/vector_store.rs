use std::path::Path;

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::warn;

use crate::error::{Error, Result};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Dense vectors keyed by explicit, never-reused vector ids.
///
/// Binary format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
///
/// Vectors are stored unit-normalized so inner product equals cosine
/// similarity.
pub struct VectorStore {
    db: Database,
}

impl VectorStore {
    /// Open or create a vector store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use vedarag::VectorStore;
    ///
    /// let store = VectorStore::open(&tmp.path().join("vectors.redb")).unwrap();
    /// assert!(store.list_ids().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store vectors in a single transaction, normalizing each one.
    ///
    /// Every vector in the batch must share one non-zero dimension.
    pub fn store_batch(&self, entries: &[(u64, Vec<f32>)]) -> Result<()> {
        let Some((_, first)) = entries.first() else {
            return Ok(());
        };
        let dimension = first.len();
        if dimension == 0 {
            return Err(Error::Config("cannot store empty vectors".into()));
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for (id, vector) in entries {
                if vector.len() != dimension {
                    return Err(Error::Config(format!(
                        "vector {id} has dimension {}, expected {dimension}",
                        vector.len()
                    )));
                }
                let mut unit = vector.clone();
                normalize(&mut unit);

                let byte_len = HEADER_SIZE + std::mem::size_of_val(unit.as_slice());
                let mut guard = table.insert_reserve(*id, byte_len)?;
                let dest = guard.as_mut();
                dest[0..HEADER_SIZE]
                    .copy_from_slice(&(dimension as u32).to_le_bytes());
                dest[HEADER_SIZE..]
                    .copy_from_slice(bytemuck::cast_slice(unit.as_slice()));
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load(&self, id: u64) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table.get(id)?.and_then(|guard| decode(guard.value())))
    }

    /// Load every stored vector. Entries with a corrupt header are logged
    /// and skipped.
    pub fn load_all(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            match decode(v.value()) {
                Some(vector) => result.push((k.value(), vector)),
                None => warn!(vector_id = k.value(), "skipping corrupt vector"),
            }
        }
        Ok(result)
    }

    /// Remove multiple vectors in a single transaction.
    pub fn remove_batch(&self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for &id in ids {
                table.remove(id)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_ids(&self) -> Result<Vec<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value());
        }
        Ok(result)
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore").finish_non_exhaustive()
    }
}

fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let dimension =
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    // The stored slice carries no alignment guarantee.
    Some(bytemuck::pod_collect_to_vec::<u8, f32>(body))
}

/// Scale `v` to unit length in place. Zero vectors are left as-is.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Exact inner-product search over an in-memory copy of the store.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<u64>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build from `(vector_id, unit_vector)` pairs. Vectors whose dimension
    /// disagrees with the first one are skipped.
    pub fn from_vectors(vectors: Vec<(u64, Vec<f32>)>) -> Self {
        let dimension = vectors.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(vectors.len());
        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (id, vector) in vectors {
            if vector.len() != dimension {
                warn!(
                    vector_id = id,
                    dimension = vector.len(),
                    expected = dimension,
                    "skipping vector with mismatched dimension"
                );
                continue;
            }
            ids.push(id);
            data.extend_from_slice(&vector);
        }
        Self {
            dimension,
            ids,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Top `k` ids by inner product with `query`, best first.
    ///
    /// `query` is normalized here; `k` is clamped to the index size.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if self.is_empty() || self.dimension == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::Config(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(u64, f32)> = self
            .data
            .par_chunks(self.dimension)
            .zip(self.ids.par_iter())
            .map(|(row, &id)| (id, dot(row, &q)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k.min(self.len()));
        Ok(scored)
    }
}
