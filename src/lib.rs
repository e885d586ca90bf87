//! vedarag - hybrid retrieval over a corpus of Ayurvedic texts.
//!
//! Page records are split into overlapping, heading-aware chunks, indexed
//! twice (a BM25 index via [Tantivy](https://github.com/quickwit-oss/tantivy)
//! and a dense vector index), queried through both at once, reranked with a
//! cross-encoder and finally narrowed to the passages handed to an answer
//! generator.
//!
//! # Quick start
//!
//! ```no_run
//! use rand::{SeedableRng, rngs::StdRng};
//! use vedarag::{DataDir, ModelHandles, RetrievalEngine, SelectionPolicy};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let engine = RetrievalEngine::open(
//!     data_dir,
//!     ModelHandles::offline(),
//!     SelectionPolicy::default(),
//! )
//! .unwrap();
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let selection = engine.context("cooling foods for pitta", &mut rng);
//! for passage in &selection.passages {
//!     println!("{} {}", passage.chunk.id, passage.chunk.text);
//! }
//! println!("{}", selection.instruction.text());
//! ```

pub mod catalog;
pub mod chunk_log;
pub mod chunking;
pub mod corpus;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod fuzzy;
pub mod hashing_model;
pub mod indexer;
pub mod ingestion;
pub mod mcp;
pub mod model_manager;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod selector;
pub mod session;
pub mod snapshot;
pub mod tantivy_index;
pub mod text_util;
pub mod vector_store;
pub mod walker;

pub use catalog::Catalog;
pub use chunk_log::ChunkLog;
pub use chunking::{Chunk, Chunker, ChunkerConfig};
pub use data_dir::DataDir;
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use model_manager::{ModelHandles, ModelOverrides, ModelSpec};
pub use pipeline::RetrievalEngine;
pub use reranker::RelevanceScorer;
pub use retriever::{Candidate, RetrievalSource};
pub use selector::{Selection, SelectionPolicy};
pub use session::{InMemorySessionStore, SessionStore};
pub use snapshot::IndexSnapshot;
pub use tantivy_index::LexicalIndex;
pub use vector_store::VectorStore;
