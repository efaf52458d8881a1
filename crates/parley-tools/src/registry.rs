//! Per-request tool composition and dispatch.
//!
//! [`ToolRegistry`] lives for the whole process and owns the long-lived
//! pieces (search backend, MCP catalog cache). Each chat request gets a
//! [`RequestTools`] snapshot that the provider adapter drives through
//! [`ToolExecutor`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    ChatTool, ConnectionParams, McpServer, StreamStatus, ToolCallRecord, ToolDefinition, ToolResultRecord, ToolType,
};
use parley_llm::ToolExecutor;
use parley_settings::SearchSettings;
use tracing::{debug, instrument, warn};

use crate::mcp::{McpCatalog, McpTool};
use crate::naming::{McpToolRef, SyntheticNameMap};
use crate::traits::ParleyTool;
use crate::web_search::{WebSearchBackend, WebSearchTool};

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide tool sources.
#[derive(Clone)]
pub struct ToolRegistry {
    search: Option<(Arc<dyn WebSearchBackend>, SearchSettings)>,
    catalog: Arc<McpCatalog>,
}

impl ToolRegistry {
    /// Registry with MCP support only.
    pub fn new(catalog: Arc<McpCatalog>) -> Self {
        Self { search: None, catalog }
    }

    /// Enable web search through `backend`.
    #[must_use]
    pub fn with_search(mut self, backend: Arc<dyn WebSearchBackend>, settings: SearchSettings) -> Self {
        self.search = Some((backend, settings));
        self
    }

    /// Whether a search backend is configured.
    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    /// Shared MCP catalog cache.
    pub fn catalog(&self) -> &Arc<McpCatalog> {
        &self.catalog
    }

    /// Compose the tools enabled on a chat.
    ///
    /// MCP servers that are inactive, unknown or unreachable are skipped
    /// with a warning; the request proceeds with whatever remains.
    #[instrument(skip_all, fields(chat_tools = chat_tools.len()))]
    pub async fn for_request(
        &self,
        chat_tools: &[ChatTool],
        mcp_servers: &[McpServer],
        connection: &ConnectionParams,
    ) -> RequestTools {
        let mut builtin: HashMap<String, Arc<dyn ParleyTool>> = HashMap::new();
        let mut mcp: HashMap<McpToolRef, McpTool> = HashMap::new();
        let mut order = Vec::new();
        let mut names = SyntheticNameMap::new();

        if chat_tools.iter().any(|t| t.tool_type == ToolType::WebSearch) {
            match &self.search {
                Some((backend, settings)) => {
                    let tool: Arc<dyn ParleyTool> = Arc::new(WebSearchTool::new(Arc::clone(backend), settings.clone()));
                    order.push(tool.name().to_owned());
                    let _ = builtin.insert(tool.name().to_owned(), tool);
                }
                None => debug!("web search requested but no backend is configured"),
            }
        }

        for chat_tool in chat_tools.iter().filter(|t| t.tool_type == ToolType::Mcp) {
            let Some(server_id) = &chat_tool.id else {
                warn!(name = %chat_tool.name, "MCP chat tool has no server id");
                continue;
            };
            let Some(server) = mcp_servers.iter().find(|s| &s.id == server_id && s.is_active) else {
                warn!(server_id = %server_id, "MCP server not configured or inactive, skipping");
                continue;
            };
            let catalog = match self.catalog.tools(server, connection).await {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "failed to list MCP tools, skipping server");
                    continue;
                }
            };
            let server = Arc::new(server.clone());
            for (index, info) in catalog.iter().enumerate() {
                let synthetic = names.insert(&server.id, index, &info.name);
                let tool = McpTool::new(
                    self.catalog.http().clone(),
                    Arc::clone(&server),
                    info.clone(),
                    synthetic.clone(),
                );
                if let Some(target) = names.resolve(&synthetic) {
                    let _ = mcp.insert(target.clone(), tool);
                }
                order.push(synthetic);
            }
        }

        debug!(count = order.len(), mcp_tools = names.len(), "request tools composed");
        RequestTools {
            builtin,
            mcp,
            order,
            names,
            connection: connection.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Tools available to one chat request.
pub struct RequestTools {
    builtin: HashMap<String, Arc<dyn ParleyTool>>,
    mcp: HashMap<McpToolRef, McpTool>,
    order: Vec<String>,
    names: SyntheticNameMap,
    connection: ConnectionParams,
}

impl RequestTools {
    /// No tools enabled.
    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.mcp.is_empty()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.builtin.len() + self.mcp.len()
    }

    /// Server and original name behind a synthetic MCP name.
    pub fn resolve_mcp(&self, synthetic: &str) -> Option<&McpToolRef> {
        self.names.resolve(synthetic)
    }

    /// Tool advertised as `name`. MCP names go through the synthetic map.
    fn lookup(&self, name: &str) -> Option<&dyn ParleyTool> {
        match self.names.resolve(name) {
            Some(target) => self.mcp.get(target).map(|tool| tool as &dyn ParleyTool),
            None => self.builtin.get(name).map(Arc::as_ref),
        }
    }
}

#[async_trait]
impl ToolExecutor for RequestTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.lookup(name))
            .map(|tool| tool.definition())
            .collect()
    }

    fn status_for(&self, name: &str) -> StreamStatus {
        self.lookup(name).map_or(StreamStatus::ToolCall, |t| t.status())
    }

    async fn execute(&self, call: &ToolCallRecord) -> ToolResultRecord {
        let Some(tool) = self.lookup(&call.name) else {
            warn!(tool_name = %call.name, "model called an unknown tool");
            return ToolResultRecord::error(&call.call_id, &call.name, format!("Error: unknown tool {}", call.name));
        };
        if let Some(err) = &call.error {
            return ToolResultRecord::error(
                &call.call_id,
                &call.name,
                format!("Error: invalid arguments for tool {}: {err}", call.name),
            );
        }
        debug!(tool_name = %call.name, tool_call_id = %call.call_id, "executing tool");
        match tool.call(call.arguments.clone(), &call.call_id, &self.connection).await {
            Ok(content) => ToolResultRecord::ok(&call.call_id, &call.name, content),
            Err(e) => ToolResultRecord::error(&call.call_id, &call.name, tool.error_text(&e)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
