use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "VEDARAG_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The VEDARAG_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/vedarag/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("vedarag")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Appendable chunk metadata, one JSON record per line.
    pub fn chunk_log(&self) -> PathBuf {
        self.root.join("chunks_meta.jsonl")
    }

    /// Chunk table, id mappings, content hashes, settings and counters.
    pub fn catalog_db(&self) -> PathBuf {
        self.root.join("catalog.redb")
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join("vectors.redb")
    }

    /// Lexical index directory. Not created here so that read paths can
    /// tell a missing index apart from an empty one.
    pub fn tantivy_dir(&self) -> PathBuf {
        self.root.join("tantivy")
    }

    /// Fail with [`Error::MissingIndex`] unless every index artifact exists.
    pub fn require_index(&self) -> Result<()> {
        let required = [
            ("catalog", self.catalog_db()),
            ("vector index", self.vectors_db()),
            ("lexical index", self.tantivy_dir()),
        ];
        for (artifact, path) in required {
            if !path.exists() {
                return Err(Error::MissingIndex { artifact, path });
            }
        }
        Ok(())
    }
}
