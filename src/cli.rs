use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use vedarag::{
    chunking::{DEFAULT_MAX_WORDS, DEFAULT_OVERLAP_WORDS},
    indexer::DEFAULT_BATCH_SIZE,
};

#[derive(Debug, Parser)]
#[command(
    name = "vedarag",
    about = "Hybrid keyword and semantic retrieval over Ayurvedic texts"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding model ID (HuggingFace) or local model path
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// Cross-encoder model ID (HuggingFace) or local model path
    #[arg(long, global = true)]
    pub rerank_model: Option<String>,

    /// Use the built-in hashing models instead of downloading any
    #[arg(long, global = true)]
    pub offline: bool,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split a corpus of page records into chunks
    Chunk(ChunkArgs),
    /// Embed and index chunks (incremental)
    Index(IndexArgs),
    /// Retrieve hybrid candidates for a query
    Search(SearchArgs),
    /// Retrieve and rerank with the cross-encoder
    Rerank(RerankArgs),
    /// Run the full pipeline and print the selected context
    Ask(AskArgs),
    /// Show index status and statistics
    Status(StatusArgs),
    /// Manage the stored model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Chunk --

#[derive(Debug, Parser)]
pub struct ChunkArgs {
    /// Directory of `*.json` / `*.jsonl` page records
    #[arg(short, long)]
    pub input: PathBuf,

    /// Maximum words per chunk
    #[arg(long, default_value_t = DEFAULT_MAX_WORDS)]
    pub max_words: usize,

    /// Words carried over between consecutive chunks of one paragraph
    #[arg(long, default_value_t = DEFAULT_OVERLAP_WORDS)]
    pub overlap_words: usize,

    /// Discard the existing chunk log and chunk everything again
    #[arg(long)]
    pub rechunk: bool,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Chunks embedded per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Remove indexed chunks no longer present in the chunk log
    #[arg(long)]
    pub prune: bool,

    /// Output the run report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of candidates to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Rerank --

#[derive(Debug, Parser)]
pub struct RerankArgs {
    /// The search query
    pub query: String,

    /// Candidates retrieved before reranking
    #[arg(short = 'n', long, default_value = "15")]
    pub top_k: usize,

    /// Results kept after reranking
    #[arg(long, default_value = "5")]
    pub keep: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The user's question
    pub query: String,

    /// Seed for exploratory passage sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output the selection as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved models
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in the catalog
    Set {
        /// Model ID (HuggingFace) or local path
        model: String,
        /// Set the reranking model instead of the embedding model
        #[arg(long)]
        rerank: bool,
    },
    /// Clear the stored model setting (revert to default)
    Clear {
        /// Clear the reranking model instead of the embedding model
        #[arg(long)]
        rerank: bool,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "vedarag",
            &mut std::io::stdout(),
        );
    }
}
