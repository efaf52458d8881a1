//! An MCP server tool exposed to the model under its synthetic name.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::tools::McpToolInfo;
use parley_core::{ConnectionParams, McpServer, StreamStatus, ToolDefinition};
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use super::client::McpClient;
use crate::errors::ToolError;
use crate::traits::ParleyTool;

/// One remote tool.
#[derive(Clone, Debug)]
pub struct McpTool {
    http: reqwest::Client,
    server: Arc<McpServer>,
    info: McpToolInfo,
    synthetic_name: String,
}

impl McpTool {
    /// Wrap `info` from `server`, advertised as `synthetic_name`.
    pub fn new(http: reqwest::Client, server: Arc<McpServer>, info: McpToolInfo, synthetic_name: String) -> Self {
        Self {
            http,
            server,
            info,
            synthetic_name,
        }
    }
}

#[async_trait]
impl ParleyTool for McpTool {
    fn name(&self) -> &str {
        &self.synthetic_name
    }

    fn definition(&self) -> ToolDefinition {
        let description = self
            .info
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("tool from {}", self.server.name));
        ToolDefinition {
            name: self.synthetic_name.clone(),
            description: format!("{}: {description}", self.info.name),
            parameters: self
                .info
                .input_schema
                .clone()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        }
    }

    fn status(&self) -> StreamStatus {
        StreamStatus::McpCall
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        call_id: &str,
        connection: &ConnectionParams,
    ) -> Result<String, ToolError> {
        let client = McpClient::new(self.http.clone(), &self.server, connection);
        match client.call_tool(&self.info.name, args).await {
            Ok(result) => {
                debug!(
                    server = %self.server.name,
                    tool_name = %self.info.name,
                    tool_call_id = call_id,
                    is_error = result.is_error,
                    "MCP tool call finished"
                );
                Ok(result.text())
            }
            Err(e) => {
                error!(server = %self.server.name, tool_name = %self.info.name, error = %e, "MCP tool call failed");
                Err(e)
            }
        }
    }

    fn error_text(&self, error: &ToolError) -> String {
        format!("Error calling MCP tool: {error}")
    }
}

#[cfg(test)]
mod tests {
    use parley_core::McpServerId;
    use parley_core::tools::{McpAuthConfig, McpAuthType};

    use super::*;

    fn tool(description: Option<&str>, schema: Option<Value>) -> McpTool {
        let server = Arc::new(McpServer {
            id: McpServerId::from("srv"),
            name: "Files".into(),
            url: "http://127.0.0.1:9".into(),
            auth_type: McpAuthType::None,
            auth_config: McpAuthConfig::default(),
            is_active: true,
        });
        let info = McpToolInfo {
            name: "read_file".into(),
            description: description.map(str::to_owned),
            input_schema: schema,
        };
        McpTool::new(reqwest::Client::new(), server, info, "M_srv_0".into())
    }

    #[test]
    fn definition_uses_synthetic_name() {
        let def = tool(Some("Read a file"), Some(json!({"type": "object", "required": ["path"]}))).definition();
        assert_eq!(def.name, "M_srv_0");
        assert_eq!(def.description, "read_file: Read a file");
        assert_eq!(def.parameters["required"][0], "path");
    }

    #[test]
    fn description_falls_back_to_server() {
        let def = tool(None, None).definition();
        assert_eq!(def.description, "read_file: tool from Files");
        assert_eq!(def.parameters, json!({"type": "object", "properties": {}}));
    }

    #[tokio::test]
    async fn unreachable_server_is_error_text() {
        let t = tool(None, None);
        let err = t
            .call(Map::new(), "c1", &ConnectionParams::default())
            .await
            .unwrap_err();
        assert!(t.error_text(&err).starts_with("Error calling MCP tool: HTTP request failed"));
    }
}
