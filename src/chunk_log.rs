//! Appendable chunk metadata log (`chunks_meta.jsonl`).
//!
//! One [`Chunk`] per line. The log is the hand-off between chunking and
//! indexing: `vedarag chunk` appends to it and `vedarag index` reads it back.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::{chunking::Chunk, error::Result};

#[derive(Debug, Clone)]
pub struct ChunkLog {
    path: PathBuf,
}

/// Result of reading the log back.
#[derive(Debug, Default)]
pub struct LogContents {
    /// Chunks in first-seen order. A later record with the same id
    /// replaces the earlier one in place.
    pub chunks: Vec<Chunk>,
    /// Lines that failed to parse and were skipped.
    pub skipped: usize,
}

impl LogContents {
    /// Distinct document ids present in the log.
    pub fn doc_ids(&self) -> HashSet<String> {
        self.chunks.iter().map(|c| c.doc_id.clone()).collect()
    }
}

impl ChunkLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every well-formed record. A missing log reads as empty.
    pub fn read(&self) -> Result<LogContents> {
        if !self.path.exists() {
            return Ok(LogContents::default());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut contents = LogContents::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = match serde_json::from_str(&line) {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping malformed chunk record"
                    );
                    contents.skipped += 1;
                    continue;
                }
            };

            match positions.get(&chunk.id) {
                Some(&idx) => contents.chunks[idx] = chunk,
                None => {
                    positions.insert(chunk.id.clone(), contents.chunks.len());
                    contents.chunks.push(chunk);
                }
            }
        }

        Ok(contents)
    }

    /// Append chunks, one JSON object per line, and flush.
    pub fn append(&self, chunks: &[Chunk]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for chunk in chunks {
            serde_json::to_writer(&mut writer, chunk)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Truncate the log so the next run re-chunks everything.
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            File::create(&self.path)?;
        }
        Ok(())
    }
}
