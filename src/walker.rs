use std::path::{Path, PathBuf};

use crate::error::Result;

/// How a corpus file lays out its page records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusFormat {
    /// A JSON array of page records.
    JsonArray,
    /// One JSON page record per line.
    JsonLines,
}

impl CorpusFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::JsonArray),
            "jsonl" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

/// A page-record file found under the corpus root.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    /// Path relative to the corpus root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub format: CorpusFormat,
}

impl CorpusFile {
    /// File stem, used as the document id when records omit one.
    pub fn stem(&self) -> String {
        self.relative_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Recursively walk a directory for `.json` and `.jsonl` page-record files.
///
/// Hidden entries (names starting with `.`) are skipped, symlinked
/// directories are not followed, and results are sorted by relative path
/// so chunking order is stable across runs.
pub fn discover_corpus(root: &Path) -> Result<Vec<CorpusFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<CorpusFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
            continue;
        }

        let resolved = if file_type.is_symlink() {
            match path.canonicalize() {
                Ok(p) if p.is_file() => p,
                _ => continue,
            }
        } else if file_type.is_file() {
            path.canonicalize()?
        } else {
            continue;
        };

        if let Some(format) = CorpusFormat::from_path(&path) {
            let relative_path =
                path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            results.push(CorpusFile {
                relative_path,
                absolute_path: resolved,
                format,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[CorpusFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_json_and_jsonl() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("charaka.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("pages.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("scan.pdf"), "binary").unwrap();

        let files = discover_corpus(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["charaka.json", "pages.jsonl"]);
        assert_eq!(files[0].format, CorpusFormat::JsonArray);
        assert_eq!(files[1].format, CorpusFormat::JsonLines);
        assert_eq!(files[0].stem(), "charaka");
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("UPPER.JSON"), "[]").unwrap();

        let files = discover_corpus(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].format, CorpusFormat::JsonArray);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".cache");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("stale.json"), "[]").unwrap();
        std::fs::write(tmp.path().join(".partial.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("visible.json"), "[]").unwrap();

        let files = discover_corpus(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["visible.json"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("sushruta");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("z.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("a.json"), "[]").unwrap();

        let files = discover_corpus(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["a.json", "sushruta/b.json", "z.json"]);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_corpus(tmp.path()).unwrap().is_empty());
    }
}
