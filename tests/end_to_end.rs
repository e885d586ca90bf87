use std::path::Path;

use rand::{SeedableRng, rngs::StdRng};
use vedarag::{
    Catalog,
    Chunk,
    ChunkLog,
    Chunker,
    ChunkerConfig,
    DataDir,
    Error,
    ModelHandles,
    RetrievalEngine,
    RetrievalSource,
    SelectionPolicy,
    VectorStore,
    hashing_model::HashingEmbedder,
    indexer::{IndexOptions, IndexReport, index_data_dir},
    ingestion::ingest_corpus,
    selector::{Instruction, QueryClass},
};

const PITTA: &str =
    "Pitta dosha is pacified by cooling foods such as coconut and cucumber";

fn corpus() -> Vec<Chunk> {
    vec![
        Chunk::new("doc1", 1, 0, PITTA.to_string(), None),
        Chunk::new("doc1", 1, 1, "Vata and dry skin".to_string(), None),
        Chunk::new(
            "doc1",
            2,
            0,
            "Kapha accumulates in spring and is relieved by warm, light meals"
                .to_string(),
            None,
        ),
        Chunk::new(
            "doc2",
            7,
            0,
            "Ojas is the essence of the seven dhatus".to_string(),
            None,
        ),
    ]
}

fn data_dir(root: &Path) -> DataDir {
    DataDir::resolve(Some(root)).unwrap()
}

fn index(data_dir: &DataDir) -> IndexReport {
    index_data_dir(data_dir, &HashingEmbedder::default(), IndexOptions::default())
        .unwrap()
}

fn open_engine(data_dir: &DataDir) -> RetrievalEngine {
    RetrievalEngine::open(
        data_dir.clone(),
        ModelHandles::offline(),
        SelectionPolicy::default(),
    )
    .unwrap()
}

fn stored_vector_ids(data_dir: &DataDir) -> Vec<u64> {
    let mut ids = VectorStore::open(&data_dir.vectors_db())
        .unwrap()
        .list_ids()
        .unwrap();
    ids.sort_unstable();
    ids
}

#[test]
fn pitta_passage_is_retrieved_and_outranks_vata() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = data_dir(tmp.path());
    ChunkLog::new(data_dir.chunk_log()).append(&corpus()).unwrap();
    index(&data_dir);

    let engine = open_engine(&data_dir);
    let query = "foods for pitta";

    let hits = engine.search(query, 4);
    assert!(hits.iter().any(|c| c.chunk.id == "doc1__p1__c0"));

    let ranked = engine.search_and_rerank(query, 10, 10);
    let position = |id: &str| ranked.iter().position(|c| c.chunk.id == id);
    let pitta = position("doc1__p1__c0").expect("pitta chunk reranked");
    if let Some(vata) = position("doc1__p1__c1") {
        assert!(pitta < vata);
    }
    assert_eq!(pitta, 0);
}

#[test]
fn merged_hits_have_no_duplicate_passages() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = data_dir(tmp.path());
    ChunkLog::new(data_dir.chunk_log()).append(&corpus()).unwrap();
    index(&data_dir);

    let engine = open_engine(&data_dir);
    let hits = engine.search("cooling foods", 4);
    let mut texts: Vec<&str> = hits.iter().map(|c| c.chunk.text.as_str()).collect();
    let before = texts.len();
    texts.sort_unstable();
    texts.dedup();
    assert_eq!(texts.len(), before);
}

#[test]
fn reindexing_unchanged_corpus_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = data_dir(tmp.path());
    ChunkLog::new(data_dir.chunk_log()).append(&corpus()).unwrap();

    let first = index(&data_dir);
    assert_eq!(first.embedded, 4);
    let ids_after_first = stored_vector_ids(&data_dir);

    let second = index(&data_dir);
    assert_eq!(second.embedded, 0);
    assert_eq!(second.unchanged, 4);
    assert_eq!(second.lexical_updated, 0);
    assert_eq!(second.generation, first.generation);
    assert_eq!(stored_vector_ids(&data_dir), ids_after_first);
}

#[test]
fn changed_chunk_gets_exactly_one_new_vector() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = data_dir(tmp.path());
    let log = ChunkLog::new(data_dir.chunk_log());
    log.append(&corpus()).unwrap();
    index(&data_dir);

    let old_id = {
        let catalog = Catalog::open(&data_dir.catalog_db()).unwrap();
        catalog.vector_ids().unwrap()["doc1__p1__c1"]
    };

    log.append(&[Chunk::new(
        "doc1",
        1,
        1,
        "Vata and dry skin respond to warm sesame oil".to_string(),
        None,
    )])
    .unwrap();
    let report = index(&data_dir);
    assert_eq!(report.embedded, 1);

    let new_id = {
        let catalog = Catalog::open(&data_dir.catalog_db()).unwrap();
        catalog.vector_ids().unwrap()["doc1__p1__c1"]
    };
    assert_ne!(new_id, old_id);

    let ids = stored_vector_ids(&data_dir);
    assert_eq!(ids.len(), 4);
    assert!(ids.contains(&new_id));
    assert!(!ids.contains(&old_id));

    // The keyword index follows the new text as well.
    let engine = open_engine(&data_dir);
    let hits = engine.search("sesame", 2);
    assert_eq!(hits[0].chunk.id, "doc1__p1__c1");
}

#[test]
fn corpus_directory_to_context() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("corpus");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(
        input.join("ahara.json"),
        format!(
            r#"[
                {{"doc_id": "doc1", "page": 1, "text": "Page 1\n{PITTA}."}},
                {{"doc_id": "doc1", "page": 2, "text": "Vata and dry skin."}},
                {{"doc_id": "doc1", "page": 3, "text": ""}}
            ]"#
        ),
    )
    .unwrap();

    let data_dir = data_dir(&tmp.path().join("data"));
    let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
    let log = ChunkLog::new(data_dir.chunk_log());
    let ingested = ingest_corpus(&input, &log, &chunker, false).unwrap();
    assert_eq!(ingested.chunks, 2);
    index(&data_dir);

    let engine = open_engine(&data_dir);
    let selection = engine.context("foods for pitta", &mut StdRng::seed_from_u64(5));
    assert_eq!(selection.class, QueryClass::Exploratory);
    assert_eq!(selection.instruction, Instruction::Varied);
    assert!(
        selection
            .passages
            .iter()
            .any(|c| c.chunk.id == "doc1__p1__c0")
    );
}

#[test]
fn empty_corpus_produces_no_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("corpus");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("empty.json"), "[]").unwrap();

    let data_dir = data_dir(&tmp.path().join("data"));
    let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
    let log = ChunkLog::new(data_dir.chunk_log());
    let report = ingest_corpus(&input, &log, &chunker, false).unwrap();
    assert_eq!(report.chunks, 0);
    assert!(log.read().unwrap().chunks.is_empty());
}

#[test]
fn engine_reloads_after_reindex() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = data_dir(tmp.path());
    let log = ChunkLog::new(data_dir.chunk_log());
    log.append(&corpus()).unwrap();
    index(&data_dir);

    let engine = open_engine(&data_dir);
    assert!(!engine.reload_if_stale());
    assert!(engine.search("triphala", 1).iter().all(|c| c.chunk.doc_id != "doc3"));

    log.append(&[Chunk::new(
        "doc3",
        1,
        0,
        "Triphala is a gentle daily rasayana".to_string(),
        None,
    )])
    .unwrap();
    index(&data_dir);

    // The loaded snapshot does not see the new commit until it reloads.
    let generation = engine.snapshot().generation();
    assert!(
        engine
            .search("triphala", 2)
            .iter()
            .all(|c| c.chunk.doc_id != "doc3")
    );
    assert_eq!(engine.snapshot().generation(), generation);

    assert!(engine.reload_if_stale());
    assert_eq!(engine.snapshot().chunk_count(), 5);
    let hits = engine.search("triphala", 1);
    assert_eq!(hits[0].chunk.id, "doc3__p1__c0");
}

#[test]
fn lost_vector_index_falls_back_to_retained_vectors() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = data_dir(tmp.path());
    ChunkLog::new(data_dir.chunk_log()).append(&corpus()).unwrap();
    index(&data_dir);
    let engine = open_engine(&data_dir);

    std::fs::remove_file(data_dir.vectors_db()).unwrap();
    Catalog::open(&data_dir.catalog_db())
        .unwrap()
        .commit_lexical(&[])
        .unwrap();
    assert!(engine.reload_if_stale());
    assert!(engine.snapshot().vectors().is_none());

    // No keyword hit for the whole query, and no vectors in the snapshot.
    let hits = engine.search("cucumber coconut zzzz", 2);
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|c| c.source == RetrievalSource::Fallback));
    assert_eq!(hits[0].chunk.id, "doc1__p1__c0");
}

#[test]
fn querying_before_indexing_asks_for_an_index() {
    let tmp = tempfile::tempdir().unwrap();
    let err = RetrievalEngine::open(
        data_dir(tmp.path()),
        ModelHandles::offline(),
        SelectionPolicy::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingIndex { .. }));
    assert!(err.to_string().contains("vedarag index"));
}
