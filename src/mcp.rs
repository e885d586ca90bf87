use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng};
use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    data_dir::DataDir,
    error,
    model_manager::ModelHandles,
    pipeline::RetrievalEngine,
    retriever::{Candidate, RetrievalSource},
    selector::{Instruction, QueryClass, SelectionPolicy},
    session::{DEFAULT_HISTORY_LIMIT, InMemorySessionStore, Role, SessionStore},
    text_util::preview,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_RERANK_TOP_K: usize = 15;
const DEFAULT_RERANK_KEEP: usize = 5;
const SUMMARY_PREVIEW_CHARS: usize = 80;

#[derive(Clone)]
pub struct VedaragMcpServer {
    engine: Arc<RetrievalEngine>,
    sessions: Arc<dyn SessionStore>,
    tool_router: ToolRouter<Self>,
}

impl VedaragMcpServer {
    fn new(engine: RetrievalEngine, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            engine: Arc::new(engine),
            sessions,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl VedaragMcpServer {
    /// Hybrid keyword + semantic candidates, not ordered by relevance.
    #[tool(
        name = "vedarag_search",
        description = "Retrieve candidate passages from the Ayurvedic corpus using keyword and semantic search. Results are not ranked; use vedarag_rerank for ordered results."
    )]
    pub async fn vedarag_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        self.engine.reload_if_stale();

        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let hits = self.engine.search(&params.query, limit);
        passages_result(params.query, hits)
    }

    #[tool(
        name = "vedarag_rerank",
        description = "Retrieve candidate passages and order them with the cross-encoder relevance model. Each result carries a rerankScore."
    )]
    pub async fn vedarag_rerank(
        &self,
        params: Parameters<RerankParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        self.engine.reload_if_stale();

        let top_k = params.top_k.unwrap_or(DEFAULT_RERANK_TOP_K);
        let keep = params.keep.unwrap_or(DEFAULT_RERANK_KEEP);
        let ranked = self.engine.search_and_rerank(&params.query, top_k, keep);
        passages_result(params.query, ranked)
    }

    /// Full pipeline: classify, retrieve, rerank and select.
    #[tool(
        name = "vedarag_context",
        description = "Build answer context for a user question: classifies the query, selects passages and returns the instruction the answer should follow. Pass sessionId to keep conversation history."
    )]
    pub async fn vedarag_context(
        &self,
        params: Parameters<ContextParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        self.engine.reload_if_stale();

        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let selection = self.engine.context(&params.query, &mut rng);

        let history = params.session_id.as_deref().map(|session| {
            let rendered = self.sessions.render(session, DEFAULT_HISTORY_LIMIT);
            self.sessions.append(session, Role::User, &params.query);
            rendered
        });

        let passages: Vec<PassageItem> =
            selection.passages.iter().map(PassageItem::from).collect();
        let summary = format_context_summary(
            selection.instruction,
            &passages,
            history.as_deref(),
        );
        let structured = serde_json::to_value(ContextResponse {
            query: params.query,
            query_class: selection.class,
            instruction: selection.instruction,
            instruction_text: selection.instruction.text(),
            history,
            passages,
        })
        .map_err(|e| mcp_error("failed to serialize context", e))?;

        Ok({
            let mut result = CallToolResult::success(vec![Content::text(summary)]);
            result.structured_content = Some(structured);
            result
        })
    }

    #[tool(
        name = "vedarag_record_answer",
        description = "Store the assistant's reply in a session so later vedarag_context calls include it in the history."
    )]
    pub async fn vedarag_record_answer(
        &self,
        params: Parameters<RecordAnswerParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        self.sessions
            .append(&params.session_id, Role::Assistant, &params.answer);
        let messages = self
            .sessions
            .recent(&params.session_id, usize::MAX)
            .len();

        Ok({
            let mut result = CallToolResult::success(vec![Content::text(format!(
                "Recorded answer for session {}",
                params.session_id
            ))]);
            result.structured_content = Some(json!({
                "sessionId": params.session_id,
                "messages": messages,
            }));
            result
        })
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for VedaragMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("vedarag", env!("CARGO_PKG_VERSION"))
                    .with_title("vedarag MCP"),
            )
            .with_instructions(
                "Use vedarag_context to gather grounded Ayurvedic passages before answering, then vedarag_record_answer to keep the session history.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of candidates (default: 10).
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RerankParams {
    /// Search query string.
    pub query: String,
    /// Candidates retrieved before reranking (default: 15).
    pub top_k: Option<usize>,
    /// Results kept after reranking (default: 5).
    pub keep: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    /// The user's question.
    pub query: String,
    /// Conversation to read history from and append the question to.
    pub session_id: Option<String>,
    /// Seed for exploratory passage sampling.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordAnswerParams {
    pub session_id: String,
    pub answer: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PassagesResponse {
    query: String,
    result_count: usize,
    results: Vec<PassageItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextResponse {
    query: String,
    query_class: QueryClass,
    instruction: Instruction,
    instruction_text: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<String>,
    passages: Vec<PassageItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PassageItem {
    chunk_id: String,
    doc_id: String,
    page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
    text: String,
    source: RetrievalSource,
    retrieval_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    rerank_score: Option<f32>,
}

impl From<&Candidate> for PassageItem {
    fn from(c: &Candidate) -> Self {
        Self {
            chunk_id: c.chunk.id.clone(),
            doc_id: c.chunk.doc_id.clone(),
            page: c.chunk.page,
            section: c.chunk.section.clone(),
            text: c.chunk.text.clone(),
            source: c.source,
            retrieval_score: c.retrieval_score,
            rerank_score: c.rerank_score,
        }
    }
}

fn passages_result(
    query: String,
    hits: Vec<Candidate>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let items: Vec<PassageItem> = hits.iter().map(PassageItem::from).collect();
    let summary = format_passages_summary(&items, &query);
    let structured = serde_json::to_value(PassagesResponse {
        query,
        result_count: items.len(),
        results: items,
    })
    .map_err(|e| mcp_error("failed to serialize search results", e))?;

    Ok({
        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result
    })
}

fn passage_line(item: &PassageItem) -> String {
    let score = item.rerank_score.unwrap_or(item.retrieval_score);
    format!(
        "{} {:.3} {}",
        item.chunk_id,
        score,
        preview(&item.text, SUMMARY_PREVIEW_CHARS)
    )
}

fn format_passages_summary(results: &[PassageItem], query: &str) -> String {
    if results.is_empty() {
        return format!("No passages found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} passage{} for \"{query}\":",
        results.len(),
        suffix
    ));
    lines.extend(results.iter().map(passage_line));
    lines.join("\n")
}

fn format_context_summary(
    instruction: Instruction,
    passages: &[PassageItem],
    history: Option<&str>,
) -> String {
    let mut out = String::new();
    if let Some(history) = history.filter(|h| !h.is_empty()) {
        out.push_str("History:\n");
        out.push_str(history);
        out.push_str("\n\n");
    }
    if !passages.is_empty() {
        out.push_str("Context:\n");
        for p in passages {
            out.push_str(&p.text);
            out.push_str("\n\n");
        }
    }
    out.push_str("Instruction: ");
    out.push_str(instruction.text());
    out
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: DataDir, models: ModelHandles) -> error::Result<()> {
    let engine =
        RetrievalEngine::open(data_dir, models, SelectionPolicy::default())?;
    let server =
        VedaragMcpServer::new(engine, Arc::new(InMemorySessionStore::default()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunking::Chunk,
        embedding::embed_normalized,
        hashing_model::HashingEmbedder,
        snapshot::IndexSnapshot,
        tantivy_index::{LexicalIndex, WRITER_MEMORY_BUDGET},
    };

    fn server() -> VedaragMcpServer {
        let chunks: Vec<Chunk> = [
            "Cooling foods for pitta include coconut water and cucumber",
            "Vata and dry skin",
            "Triphala supports digestion",
        ]
        .iter()
        .enumerate()
        .map(|(i, t)| Chunk::new("guide", 3, i, t.to_string(), None))
        .collect();

        let embedder = HashingEmbedder::default();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_normalized(&embedder, &texts, 8, |_| {})
            .unwrap()
            .into_iter()
            .zip(&chunks)
            .enumerate()
            .map(|(i, (v, c))| (i as u64 + 1, c.id.clone(), v))
            .collect();

        let lexical = LexicalIndex::open_in_ram().unwrap();
        let mut writer = lexical.writer(WRITER_MEMORY_BUDGET).unwrap();
        for c in &chunks {
            lexical.upsert(&writer, c).unwrap();
        }
        writer.commit().unwrap();
        lexical.refresh().unwrap();

        let snapshot =
            IndexSnapshot::from_parts(chunks, Some(vectors), Some(lexical));
        let engine = RetrievalEngine::from_snapshot(
            snapshot,
            ModelHandles::offline(),
            SelectionPolicy::default(),
        )
        .unwrap();
        VedaragMcpServer::new(engine, Arc::new(InMemorySessionStore::default()))
    }

    fn summary(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn search_tool_returns_structured_results() {
        let server = server();
        let params = SearchParams {
            query: "cooling foods".to_string(),
            limit: Some(5),
        };

        let result = server.vedarag_search(Parameters(params)).await.unwrap();

        let structured = result.structured_content.clone().expect("structured");
        let results = structured
            .get("results")
            .and_then(|v| v.as_array())
            .expect("results array");
        assert!(!results.is_empty());

        let texts: Vec<&str> = results
            .iter()
            .filter_map(|r| r.get("text").and_then(|v| v.as_str()))
            .collect();
        assert!(texts.iter().any(|t| t.contains("coconut water")));
        assert_eq!(
            results[0].get("docId").and_then(|v| v.as_str()),
            Some("guide")
        );
        assert!(summary(&result).starts_with("Found"));
    }

    #[tokio::test]
    async fn rerank_tool_attaches_scores() {
        let server = server();
        let params = RerankParams {
            query: "cooling foods for pitta".to_string(),
            top_k: Some(3),
            keep: Some(2),
        };

        let result = server.vedarag_rerank(Parameters(params)).await.unwrap();
        let structured = result.structured_content.expect("structured");
        let results = structured["results"].as_array().expect("results array");

        assert!(!results.is_empty() && results.len() <= 2);
        assert!(results.iter().all(|r| r.get("rerankScore").is_some()));
        assert!(results[0]["text"].as_str().unwrap().contains("pitta"));
    }

    #[tokio::test]
    async fn context_tool_tracks_session_history() {
        let server = server();

        let first = server
            .vedarag_context(Parameters(ContextParams {
                query: "foods for pitta".to_string(),
                session_id: Some("s1".to_string()),
                seed: Some(3),
            }))
            .await
            .unwrap();
        let structured = first.structured_content.clone().expect("structured");
        assert_eq!(structured["queryClass"], "exploratory");
        assert_eq!(structured["instruction"], "varied");
        assert_eq!(structured["history"], "");

        server
            .vedarag_record_answer(Parameters(RecordAnswerParams {
                session_id: "s1".to_string(),
                answer: "Try coconut water.".to_string(),
            }))
            .await
            .unwrap();

        let second = server
            .vedarag_context(Parameters(ContextParams {
                query: "hello".to_string(),
                session_id: Some("s1".to_string()),
                seed: None,
            }))
            .await
            .unwrap();
        let structured = second.structured_content.clone().expect("structured");
        assert_eq!(structured["instruction"], "greet");
        assert_eq!(
            structured["history"],
            "USER: foods for pitta\nASSISTANT: Try coconut water."
        );
        assert!(summary(&second).contains("History:"));
    }
}
