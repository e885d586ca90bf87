use clap::Parser;
use rand::{SeedableRng, rngs::StdRng};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vedarag::{
    Catalog,
    ChunkLog,
    DataDir,
    LexicalIndex,
    ModelHandles,
    ModelOverrides,
    ModelSpec,
    RetrievalEngine,
    VectorStore,
    catalog::settings,
    chunking::{Chunker, ChunkerConfig},
    error,
    indexer::{self, IndexOptions},
    ingestion,
    mcp,
    retriever::Candidate,
    selector::{Selection, SelectionPolicy},
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, preview},
};

mod cli;

use cli::{Cli, Command, ModelAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("VEDARAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let overrides = ModelOverrides {
        embedding_model: cli.embedding_model.clone(),
        rerank_model: cli.rerank_model.clone(),
        offline: cli.offline,
    };

    match cli.command {
        Command::Chunk(args) => cmd_chunk(&data_dir, &args)?,
        Command::Index(args) => {
            let spec = resolve_models(&overrides, &data_dir)?;
            let embedder = vedarag::model_manager::load_embedder(&spec)?;
            let report = indexer::index_data_dir(
                &data_dir,
                embedder.as_ref(),
                IndexOptions {
                    batch_size: args.batch_size,
                    prune: args.prune,
                    progress: !cli.quiet,
                },
            )?;
            if args.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "Embedded {} chunk(s), {} unchanged, {} lexical update(s), {} pruned, {} invalid",
                    report.embedded,
                    report.unchanged,
                    report.lexical_updated,
                    report.pruned,
                    report.invalid
                );
                println!("Index generation: {}", report.generation);
            }
        }
        Command::Search(args) => {
            let engine = open_engine(&overrides, &data_dir)?;
            let results = engine.search(&args.query, args.count);
            print_candidates(&results, &args.query, args.json)?;
        }
        Command::Rerank(args) => {
            let engine = open_engine(&overrides, &data_dir)?;
            let results =
                engine.search_and_rerank(&args.query, args.top_k, args.keep);
            print_candidates(&results, &args.query, args.json)?;
        }
        Command::Ask(args) => {
            let engine = open_engine(&overrides, &data_dir)?;
            let mut rng = match args.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            let selection = engine.context(&args.query, &mut rng);
            print_selection(&selection, &args.query, args.json)?;
        }
        Command::Status(args) => cmd_status(&data_dir, &overrides, args.json)?,
        Command::Model { action } => cmd_model(&data_dir, &overrides, action)?,
        Command::Mcp => {
            let spec = resolve_models(&overrides, &data_dir)?;
            let models = ModelHandles::load(&spec)?;
            mcp::run_mcp(data_dir, models)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Resolve model ids, consulting the catalog only if one already exists.
fn resolve_models(
    overrides: &ModelOverrides,
    data_dir: &DataDir,
) -> error::Result<ModelSpec> {
    if data_dir.catalog_db().exists() {
        let catalog = Catalog::open(&data_dir.catalog_db())?;
        ModelSpec::resolve(overrides, Some(&catalog))
    } else {
        ModelSpec::resolve(overrides, None)
    }
}

fn open_engine(
    overrides: &ModelOverrides,
    data_dir: &DataDir,
) -> error::Result<RetrievalEngine> {
    data_dir.require_index()?;
    let spec = resolve_models(overrides, data_dir)?;
    let models = ModelHandles::load(&spec)?;
    RetrievalEngine::open(data_dir.clone(), models, SelectionPolicy::default())
}

fn cmd_chunk(data_dir: &DataDir, args: &cli::ChunkArgs) -> error::Result<()> {
    if !args.input.is_dir() {
        return Err(error::Error::Config(format!(
            "input is not a directory: {}",
            args.input.display()
        )));
    }

    let chunker = Chunker::new(ChunkerConfig {
        max_words: args.max_words,
        overlap_words: args.overlap_words,
    })?;
    let log = ChunkLog::new(data_dir.chunk_log());
    let report =
        ingestion::ingest_corpus(&args.input, &log, &chunker, args.rechunk)?;

    if report.already_chunked > 0 {
        info!(
            documents = report.already_chunked,
            "skipped documents already in the chunk log"
        );
    }
    println!(
        "Chunked {} document(s) into {} chunk(s) -> {}",
        report.documents - report.already_chunked,
        report.chunks,
        log.path().display()
    );
    Ok(())
}

fn print_candidates(
    results: &[Candidate],
    query: &str,
    json: bool,
) -> error::Result<()> {
    if json {
        let out = json!({
            "query": query,
            "result_count": results.len(),
            "results": results,
        });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (rank, c) in results.iter().enumerate() {
        let score = c.rerank_score.unwrap_or(c.retrieval_score);
        println!("{:>3}. [{score:.3}] {} ({:?})", rank + 1, c.chunk.id, c.source);
        println!("     {}", preview(&c.chunk.text, DEFAULT_PREVIEW_MAX_CHARS));
    }
    println!("\n{} result(s)", results.len());
    Ok(())
}

fn print_selection(
    selection: &Selection,
    query: &str,
    json: bool,
) -> error::Result<()> {
    if json {
        let out = json!({
            "query": query,
            "class": selection.class,
            "instruction": selection.instruction,
            "instruction_text": selection.instruction.text(),
            "passages": selection.passages,
        });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    }

    for (i, c) in selection.passages.iter().enumerate() {
        println!("[{}] {} (page {})", i + 1, c.chunk.doc_id, c.chunk.page);
        println!("{}\n", c.chunk.text);
    }
    println!("Instruction: {}", selection.instruction.text());
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    overrides: &ModelOverrides,
    json: bool,
) -> error::Result<()> {
    let catalog_path = data_dir.catalog_db();
    let (chunks, generation, indexed_model) = if catalog_path.exists() {
        let catalog = Catalog::open(&catalog_path)?;
        (
            catalog.chunk_count()?,
            catalog.generation()?,
            catalog.get_setting(settings::INDEXED_MODEL)?,
        )
    } else {
        (0, 0, None)
    };

    let vectors = if data_dir.vectors_db().exists() {
        VectorStore::open(&data_dir.vectors_db())?.list_ids()?.len()
    } else {
        0
    };

    let lexical_docs = match LexicalIndex::open_existing(&data_dir.tantivy_dir()) {
        Ok(index) => index.num_docs()?,
        Err(error::Error::MissingIndex { .. }) => 0,
        Err(e) => {
            warn!(error = %e, "could not open lexical index");
            0
        }
    };

    let spec = resolve_models(overrides, data_dir)?;

    if json {
        let out = json!({
            "data_dir": data_dir.root().display().to_string(),
            "chunks": chunks,
            "vectors": vectors,
            "lexical_docs": lexical_docs,
            "generation": generation,
            "indexed_embedding_model": indexed_model,
            "embedding_model": spec.embedding_model,
            "rerank_model": spec.rerank_model,
            "offline": spec.offline,
        });
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Chunks: {chunks}");
        println!("Vectors: {vectors}");
        println!("Lexical documents: {lexical_docs}");
        println!("Generation: {generation}");
        println!(
            "Indexed with: {}",
            indexed_model.as_deref().unwrap_or("(not indexed)")
        );
        if spec.offline {
            println!("Models: offline hashing models");
        } else {
            println!("Embedding model: {}", spec.embedding_model);
            println!("Rerank model: {}", spec.rerank_model);
        }
    }
    Ok(())
}

fn cmd_model(
    data_dir: &DataDir,
    overrides: &ModelOverrides,
    action: ModelAction,
) -> error::Result<()> {
    let setting = |rerank: bool| {
        if rerank {
            settings::RERANK_MODEL
        } else {
            settings::EMBEDDING_MODEL
        }
    };

    match action {
        ModelAction::Show { json } => {
            let spec = resolve_models(overrides, data_dir)?;
            if json {
                let out = json!({
                    "embedding_model": spec.embedding_model,
                    "rerank_model": spec.rerank_model,
                    "offline": spec.offline,
                });
                println!("{}", serde_json::to_string(&out)?);
            } else {
                println!("Embedding model: {}", spec.embedding_model);
                println!("Rerank model: {}", spec.rerank_model);
                if spec.offline {
                    println!("Offline: hashing models in use");
                }
            }
        }
        ModelAction::Set { model, rerank } => {
            let catalog = Catalog::open(&data_dir.catalog_db())?;
            catalog.set_setting(setting(rerank), &model)?;
            println!("Stored {}: {model}", setting(rerank));
        }
        ModelAction::Clear { rerank } => {
            let catalog = Catalog::open(&data_dir.catalog_db())?;
            if catalog.remove_setting(setting(rerank))? {
                println!("Cleared {}", setting(rerank));
            } else {
                println!("No {} stored", setting(rerank));
            }
        }
    }
    Ok(())
}
