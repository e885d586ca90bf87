//! Page-record ingestion.
//!
//! The corpus is a directory of files produced by an upstream text
//! extractor. Each record carries a `doc_id`, a page number and the raw
//! page text. Records that cannot be parsed are logged and skipped so one
//! bad line never aborts the batch.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    walker::{CorpusFile, CorpusFormat, discover_corpus},
};

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub text: String,
}

/// A source document and its pages in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_id: String,
    pub pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct PageRecord {
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Cleans raw extractor output before chunking.
///
/// Drops `Page N` / `Page | N` markers and control characters, folds runs
/// of horizontal whitespace to one space and runs of blank lines to a
/// single blank line. Line breaks are kept so list-shaped content (recipes,
/// ingredient lists) stays on separate lines.
#[derive(Debug, Clone)]
pub struct PageNormalizer {
    page_marker: Regex,
    horizontal_ws: Regex,
    blank_lines: Regex,
}

impl PageNormalizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(e.to_string()))
        };
        Ok(Self {
            page_marker: compile(r"(?i)page\s*\|?\s*\d+")?,
            horizontal_ws: compile(r"[ \t]+")?,
            blank_lines: compile(r"\n\s*\n+")?,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let text = self.page_marker.replace_all(raw, "");
        let text: String = text
            .chars()
            .filter_map(|c| match c {
                '\n' => Some('\n'),
                '\t' => Some(' '),
                c if c.is_control() => None,
                c => Some(c),
            })
            .collect();
        let text = self.horizontal_ws.replace_all(&text, " ");
        let text = self.blank_lines.replace_all(&text, "\n\n");
        text.trim().to_string()
    }
}

/// Parse one corpus file into documents.
///
/// Records without a `doc_id` are attributed to the file stem; records
/// without a page number get page 0. Pages whose text is empty after
/// normalization are dropped.
pub fn load_corpus_file(
    file: &CorpusFile,
    normalizer: &PageNormalizer,
) -> Result<Vec<Document>> {
    let contents = std::fs::read_to_string(&file.absolute_path)?;
    let fallback_id = file.stem();

    let values: Vec<(usize, serde_json::Value)> = match file.format {
        CorpusFormat::JsonArray => {
            match serde_json::from_str::<Vec<serde_json::Value>>(&contents) {
                Ok(values) => values.into_iter().enumerate().collect(),
                Err(e) => {
                    warn!(
                        file = %file.relative_path.display(),
                        error = %e,
                        "skipping corpus file that is not a JSON array"
                    );
                    return Ok(Vec::new());
                }
            }
        }
        CorpusFormat::JsonLines => contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(i, line)| match serde_json::from_str(line) {
                Ok(v) => Some((i, v)),
                Err(e) => {
                    warn!(
                        file = %file.relative_path.display(),
                        line = i + 1,
                        error = %e,
                        "skipping malformed page record"
                    );
                    None
                }
            })
            .collect(),
    };

    let mut docs = DocumentSet::default();
    for (position, value) in values {
        let record: PageRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    file = %file.relative_path.display(),
                    record = position,
                    error = %e,
                    "skipping malformed page record"
                );
                continue;
            }
        };

        let doc_id = record
            .doc_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fallback_id.clone());
        let text = normalizer.normalize(record.text.as_deref().unwrap_or(""));
        if text.is_empty() {
            debug!(doc_id, page = ?record.page, "empty page text");
        }
        docs.push(doc_id, Page {
            page: record.page.unwrap_or(0),
            text,
        });
    }

    Ok(docs.into_vec())
}

/// Load every document under `root`.
///
/// Files that cannot be read are skipped with a warning. Pages belonging
/// to the same `doc_id` across files are merged in discovery order.
pub fn load_corpus(root: &std::path::Path) -> Result<Vec<Document>> {
    let normalizer = PageNormalizer::new()?;
    let mut merged = DocumentSet::default();

    for file in discover_corpus(root)? {
        match load_corpus_file(&file, &normalizer) {
            Ok(docs) => {
                for doc in docs {
                    for page in doc.pages {
                        merged.push(doc.doc_id.clone(), page);
                    }
                }
            }
            Err(e) => warn!(
                file = %file.relative_path.display(),
                error = %e,
                "skipping unreadable corpus file"
            ),
        }
    }

    Ok(merged.into_vec())
}

/// Documents keyed by id, preserving first-seen order.
#[derive(Default)]
struct DocumentSet {
    order: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl DocumentSet {
    fn push(&mut self, doc_id: String, page: Page) {
        if page.text.is_empty() {
            return;
        }
        let idx = *self.positions.entry(doc_id.clone()).or_insert_with(|| {
            self.order.push(Document {
                doc_id,
                pages: Vec::new(),
            });
            self.order.len() - 1
        });
        self.order[idx].pages.push(page);
    }

    fn into_vec(self) -> Vec<Document> {
        self.order
    }
}
