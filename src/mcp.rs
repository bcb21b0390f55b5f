use std::sync::Arc;

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
    document::{ContentType, DateRange, TenantId},
    engine::{DEFAULT_TOP_K, RetrievalEngine, SearchMode, SearchRequest},
    error,
};

struct RagstashState {
    engine: RetrievalEngine,
}

#[derive(Clone)]
pub struct RagstashMcpServer {
    state: Arc<RagstashState>,
    tool_router: ToolRouter<Self>,
}

impl RagstashMcpServer {
    pub fn new(engine: RetrievalEngine) -> Self {
        Self {
            state: Arc::new(RagstashState { engine }),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl RagstashMcpServer {
    /// Search one tenant's saved content by meaning, exact terms, or both.
    #[tool(
        name = "search_saved_content",
        description = "Search through saved articles and content. Supports semantic, keyword, and hybrid modes plus content-type and date filters."
    )]
    pub async fn search_saved_content(
        &self,
        params: Parameters<SearchToolParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();

        let request = SearchRequest {
            tenant_id: params.tenant_id,
            query: params.query,
            mode: params.mode.unwrap_or_default(),
            type_filter: params.type_filter,
            date_range: params.date_range,
            top_k: params.top_k.unwrap_or(DEFAULT_TOP_K),
        };

        let response =
            self.state.engine.search(&request).await.map_err(|e| {
                rmcp::ErrorData::internal_error(
                    format!("search failed: {e}"),
                    Some(json!({ "kind": e.kind() })),
                )
            })?;

        let summary = format_search_summary(&response, &query);
        let structured = serde_json::to_value(&response)
            .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for RagstashMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("ragstash", env!("CARGO_PKG_VERSION"))
                    .with_title("ragstash MCP"),
            )
            .with_instructions(
                "Use search_saved_content to find a user's saved pages and documents. Always pass the tenantId of the user on whose behalf you are searching.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchToolParams {
    /// Search query text.
    pub query: String,
    /// User whose saved content is searched. Never inferred.
    pub tenant_id: TenantId,
    /// Retrieval mode: "semantic", "keyword", or "hybrid" (default).
    pub mode: Option<SearchMode>,
    /// Restrict results to one content type.
    pub type_filter: Option<ContentType>,
    /// Inclusive created-at bounds, epoch seconds.
    pub date_range: Option<DateRange>,
    /// Maximum number of results (default: 10).
    pub top_k: Option<usize>,
}

fn format_search_summary(
    response: &crate::engine::SearchResponse,
    query: &str,
) -> String {
    if response.results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(response.results.len() + 2);
    let suffix = if response.results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        response.results.len(),
        suffix
    ));
    if response.degraded {
        lines.push(
            "(degraded: one retrieval branch was unavailable)".to_string(),
        );
    }

    for result in &response.results {
        lines.push(format!(
            "#{} {:.3} [{}] {}",
            result.doc_id,
            result.fused_score,
            result.metadata_snapshot.content_type,
            result.metadata_snapshot.title
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Serve the tool interface over stdio until the client disconnects.
pub fn run_mcp(engine: RetrievalEngine) -> error::Result<()> {
    let server = RagstashMcpServer::new(engine);

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
