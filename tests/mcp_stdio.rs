use std::path::{Path, PathBuf};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;
use vedarag::{
    Chunk,
    DataDir,
    hashing_model::HashingEmbedder,
    indexer::{IndexOptions, IndexStores, index_chunks},
};

fn setup_fixture(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(root))?;
    let chunks = vec![
        Chunk::new(
            "ahara",
            4,
            0,
            "Cooling foods for pitta include coconut water, cucumber and sweet grapes."
                .to_string(),
            Some("Pathya".to_string()),
        ),
        Chunk::new(
            "ahara",
            4,
            1,
            "Vata is aggravated by dry, cold and light foods.".to_string(),
            None,
        ),
        Chunk::new(
            "dinacharya",
            1,
            0,
            "Oil massage in the morning steadies vata.".to_string(),
            None,
        ),
    ];

    // Stores are dropped before the server process opens them.
    let stores = IndexStores::open(&data_dir)?;
    index_chunks(
        chunks,
        &stores,
        &HashingEmbedder::default(),
        IndexOptions::default(),
    )?;
    Ok(())
}

fn call(name: &str, args: serde_json::Value) -> CallToolRequestParams {
    let mut params = CallToolRequestParams::new(name.to_string());
    params.arguments = args.as_object().cloned();
    params
}

#[tokio::test]
async fn mcp_stdio_search_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = vedarag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.args(["mcp", "--offline", "--quiet"])
                .env("VEDARAG_DATA_DIR", tempdir.path());
        }),
    )?;

    let client = ().serve(transport).await?;

    let result = client
        .peer()
        .call_tool(call(
            "vedarag_search",
            json!({ "query": "cooling foods", "limit": 5 }),
        ))
        .await?;
    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");
    assert!(!results.is_empty());
    assert!(results.iter().any(|r| {
        r.get("chunkId").and_then(|v| v.as_str()) == Some("ahara__p4__c0")
    }));

    let reranked = client
        .peer()
        .call_tool(call(
            "vedarag_rerank",
            json!({ "query": "cooling foods for pitta", "topK": 3, "keep": 1 }),
        ))
        .await?;
    let structured = reranked.structured_content.expect("structured content");
    let results = structured["results"].as_array().expect("results array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["chunkId"], "ahara__p4__c0");
    assert_eq!(results[0]["section"], "Pathya");

    let context = client
        .peer()
        .call_tool(call(
            "vedarag_context",
            json!({ "query": "what is ojas", "sessionId": "t1" }),
        ))
        .await?;
    let structured = context.structured_content.expect("structured content");
    assert_eq!(structured["queryClass"], "factual");
    assert!(structured["passages"].as_array().is_some());

    client.cancel().await?;
    Ok(())
}

fn vedarag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_vedarag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("vedarag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
