use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    doc,
    query::{QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        Language,
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        StopWordFilter,
        TextAnalyzer,
    },
};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// Field names used in the schema.
pub mod fields {
    pub const CHUNK_ID: &str = "chunk_id";
    pub const DOC_ID: &str = "doc_id";
    pub const PAGE: &str = "page";
    pub const TEXT: &str = "text";
}

/// Memory budget for index writers.
pub const WRITER_MEMORY_BUDGET: usize = 50_000_000;

/// Short function words dropped at index and query time so conjunctive
/// queries like "foods for pitta" only require the content words.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "for", "from",
    "have", "if", "in", "is", "it", "may", "not", "of", "on", "or", "that",
    "the", "this", "to", "us", "we", "when", "will", "with", "yet", "you",
    "your",
];

/// Keyword (BM25) index over chunk text.
///
/// Searches see the commits present when the index was opened, or at the
/// last [`LexicalIndex::refresh`]. Commits made later, by this process or
/// another, stay invisible until then.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub chunk_id: Field,
    pub doc_id: Field,
    pub page: Field,
    pub text: Field,
}

/// A keyword hit with the stored chunk fields.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub score: f32,
    pub chunk_id: String,
    pub doc_id: String,
    pub page: u32,
    pub text: String,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let chunk_id = builder.add_text_field(fields::CHUNK_ID, STRING | STORED);
    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);
    let page = builder.add_u64_field(fields::PAGE, STORED);

    let text_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let text = builder.add_text_field(fields::TEXT, text_opts);

    let schema = builder.build();
    (schema, SchemaFields {
        chunk_id,
        doc_id,
        page,
        text,
    })
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOP_WORDS.iter().map(|w| w.to_string()),
        ))
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    let f = |name: &str| {
        schema.get_field(name).map_err(|_| {
            Error::Config(format!("lexical index is missing field '{name}'"))
        })
    };
    Ok(SchemaFields {
        chunk_id: f(fields::CHUNK_ID)?,
        doc_id: f(fields::DOC_ID)?,
        page: f(fields::PAGE)?,
        text: f(fields::TEXT)?,
    })
}

impl LexicalIndex {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, _) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::from_index(index)
    }

    /// Open an index that must already exist.
    ///
    /// Fails with [`Error::MissingIndex`] instead of creating an empty one,
    /// so a query path never silently searches nothing.
    pub fn open_existing(dir: &Path) -> Result<Self> {
        let missing = || Error::MissingIndex {
            artifact: "lexical index",
            path: dir.to_path_buf(),
        };
        if !dir.is_dir() {
            return Err(missing());
        }
        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        if !Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            return Err(missing());
        }
        Self::from_index(Index::open(mmap_dir)?)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, _) = build_schema();
        Self::from_index(Index::create_in_ram(schema))
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizers(&index);
        let fields = resolve_fields(&index.schema())?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add a chunk, replacing any document with the same chunk id.
    pub fn upsert(&self, writer: &IndexWriter, chunk: &Chunk) -> Result<()> {
        let f = self.fields;
        writer.delete_term(Term::from_field_text(f.chunk_id, &chunk.id));
        writer.add_document(doc!(
            f.chunk_id => chunk.id.as_str(),
            f.doc_id => chunk.doc_id.as_str(),
            f.page => u64::from(chunk.page),
            f.text => chunk.text.as_str(),
        ))?;
        Ok(())
    }

    /// Delete a single chunk by id.
    pub fn delete(&self, writer: &IndexWriter, chunk_id: &str) {
        writer.delete_term(Term::from_field_text(self.fields.chunk_id, chunk_id));
    }

    /// Move searches forward to the latest commit.
    pub fn refresh(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    /// Whether a chunk id is present in the latest commit. Refreshes.
    pub fn contains(&self, chunk_id: &str) -> Result<bool> {
        self.refresh()?;
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.chunk_id, chunk_id),
            IndexRecordOption::Basic,
        );
        Ok(searcher.search(&query, &Count)? > 0)
    }

    /// Number of live documents in the latest commit. Refreshes.
    pub fn num_docs(&self) -> Result<u64> {
        self.refresh()?;
        Ok(self.reader.searcher().num_docs())
    }

    /// Keyword search with BM25 scoring.
    ///
    /// Terms are combined conjunctively. The query is parsed strictly: a
    /// query the parser rejects (an unknown `field:` prefix, unbalanced
    /// quotes) is returned as [`Error::QueryParse`] so the caller can
    /// decide how to degrade.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;
        let searcher = self.reader.searcher();

        let mut parser = QueryParser::for_index(&self.index, vec![f.text]);
        parser.set_conjunction_by_default();
        let query = parser.parse_query(query_str)?;

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(LexicalHit {
                score,
                chunk_id: extract_text(&doc, f.chunk_id),
                doc_id: extract_text(&doc, f.doc_id),
                page: u32::try_from(extract_u64(&doc, f.page)).unwrap_or(0),
                text: extract_text(&doc, f.text),
            });
        }

        Ok(results)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
