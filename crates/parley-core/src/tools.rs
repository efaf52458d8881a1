//! Tool definitions and the call/result records embedded in message metadata.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::McpServerId;

/// A tool as advertised to a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Name the model uses to call the tool.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// A tool call requested by a model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Backend-assigned call ID.
    pub call_id: String,
    /// Tool name as called by the model.
    pub name: String,
    /// Parsed arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Set when the arguments could not be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How requests to an MCP server authenticate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum McpAuthType {
    /// No credentials.
    #[default]
    None,
    /// Static key in a custom header.
    ApiKey,
    /// `Authorization: Bearer` token.
    Bearer,
    /// OAuth2 access token, sent as a bearer token.
    Oauth2,
}

/// Credentials for an MCP server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpAuthConfig {
    /// Key for [`McpAuthType::ApiKey`].
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Header carrying the API key (default `X-API-Key`).
    pub header_name: Option<String>,
    /// Token for bearer and OAuth2 auth.
    #[serde(skip_serializing)]
    pub bearer_token: Option<SecretString>,
}

/// A tool advertised by an MCP server's `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    /// Original tool name on the server.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// A configured MCP tool server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    /// Server ID.
    pub id: McpServerId,
    /// Display name.
    pub name: String,
    /// Streamable HTTP endpoint.
    pub url: String,
    /// Auth scheme.
    #[serde(default)]
    pub auth_type: McpAuthType,
    /// Credentials.
    #[serde(default)]
    pub auth_config: McpAuthConfig,
    /// Inactive servers are ignored.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Result of a tool call, as sent back to the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRecord {
    /// Call ID this result answers.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Text content returned to the model.
    pub content: String,
    /// Whether the content describes a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultRecord {
    /// Successful result.
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Failed result whose content is the error text.
    pub fn error(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_server_secrets_are_not_serialized() {
        let server: McpServer = serde_json::from_str(
            r#"{"id":"s1","name":"files","url":"http://x","authType":"BEARER","authConfig":{"bearerToken":"t"}}"#,
        )
        .unwrap();
        assert_eq!(server.auth_type, McpAuthType::Bearer);
        assert!(server.is_active);
        assert!(server.auth_config.bearer_token.is_some());
        let json = serde_json::to_value(&server).unwrap();
        assert!(json["authConfig"].get("bearerToken").is_none());
    }

    #[test]
    fn error_result_is_flagged() {
        let r = ToolResultRecord::error("c1", "t", "boom");
        assert!(r.is_error);
        assert!(!ToolResultRecord::ok("c1", "t", "fine").is_error);
    }
}
