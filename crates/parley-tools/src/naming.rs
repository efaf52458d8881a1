//! Synthetic names for MCP tools.
//!
//! MCP tool names are only unique per server and may contain characters
//! model APIs reject, so each tool is advertised as
//! `M_{server id without dashes}_{index}`. The map is built once per request
//! and resolves names in both directions.

use std::collections::HashMap;

use parley_core::McpServerId;

/// Server and original name behind a synthetic name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct McpToolRef {
    /// Owning server.
    pub server_id: McpServerId,
    /// Name on that server.
    pub original_name: String,
}

/// Synthetic name of the `index`-th tool of a server.
pub fn synthetic_name(server_id: &McpServerId, index: usize) -> String {
    format!("M_{}_{index}", server_id.as_str().replace('-', ""))
}

/// Bidirectional synthetic ↔ original name map.
#[derive(Clone, Debug, Default)]
pub struct SyntheticNameMap {
    forward: HashMap<String, McpToolRef>,
    reverse: HashMap<McpToolRef, String>,
}

impl SyntheticNameMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `index`-th tool of a server and return its synthetic name.
    pub fn insert(&mut self, server_id: &McpServerId, index: usize, original_name: &str) -> String {
        let name = synthetic_name(server_id, index);
        let target = McpToolRef {
            server_id: server_id.clone(),
            original_name: original_name.to_owned(),
        };
        let _ = self.reverse.insert(target.clone(), name.clone());
        let _ = self.forward.insert(name.clone(), target);
        name
    }

    /// Original tool behind a synthetic name.
    pub fn resolve(&self, synthetic: &str) -> Option<&McpToolRef> {
        self.forward.get(synthetic)
    }

    /// Synthetic name of a server's tool.
    pub fn synthetic_for(&self, server_id: &McpServerId, original_name: &str) -> Option<&str> {
        let key = McpToolRef {
            server_id: server_id.clone(),
            original_name: original_name.to_owned(),
        };
        self.reverse.get(&key).map(String::as_str)
    }

    /// Number of mapped tools.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether no tools are mapped.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
