//! Per-server cache of `tools/list` results.

use std::sync::Arc;

use dashmap::DashMap;
use parley_core::tools::McpToolInfo;
use parley_core::{ConnectionParams, McpServer, McpServerId};
use tracing::debug;

use super::client::McpClient;
use crate::errors::ToolResult;

/// Tool catalogs keyed by server ID.
///
/// Entries live until [`invalidate`](McpCatalog::invalidate) is called, e.g.
/// after a server's configuration changes.
#[derive(Debug, Default)]
pub struct McpCatalog {
    http: reqwest::Client,
    cache: DashMap<McpServerId, Arc<Vec<McpToolInfo>>>,
}

impl McpCatalog {
    /// Catalog using the shared connection pool.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: DashMap::new(),
        }
    }

    /// Connection pool shared with tool calls.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Cached catalog, fetched on first use.
    pub async fn tools(&self, server: &McpServer, connection: &ConnectionParams) -> ToolResult<Arc<Vec<McpToolInfo>>> {
        if let Some(hit) = self.cache.get(&server.id) {
            return Ok(Arc::clone(hit.value()));
        }
        let client = McpClient::new(self.http.clone(), server, connection);
        let tools = Arc::new(client.list_tools().await?);
        debug!(server_id = %server.id, count = tools.len(), "MCP catalog cached");
        let _ = self.cache.insert(server.id.clone(), Arc::clone(&tools));
        Ok(tools)
    }

    /// Drop a server's cached catalog.
    pub fn invalidate(&self, server_id: &McpServerId) {
        let _ = self.cache.remove(server_id);
    }
}
