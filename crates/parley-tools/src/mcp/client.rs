//! JSON-RPC 2.0 client over the MCP Streamable HTTP transport.
//!
//! Every call is a `POST` to the server URL. Servers answer either with a
//! JSON body or with an SSE body; for SSE the last `data:` payload carrying
//! a `result` wins. A session ID returned by `initialize` is echoed on later
//! requests.

use parking_lot::Mutex;
use parley_core::tools::{McpAuthType, McpToolInfo};
use parley_core::{ConnectionParams, McpServer};
use parley_llm::sse::sse_data_lines;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, trace, warn};

use crate::errors::{ToolError, ToolResult};

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const SESSION_HEADER: &str = "mcp-session-id";

/// Default header for [`McpAuthType::ApiKey`].
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying a server's credentials, if any.
///
/// A per-request token for the server replaces a configured bearer token.
pub fn auth_header(server: &McpServer, connection: &ConnectionParams) -> Option<(String, String)> {
    let config = &server.auth_config;
    let bearer = |token: &SecretString| ("Authorization".to_owned(), format!("Bearer {}", token.expose_secret()));
    let override_token = connection.mcp_tokens.get(server.id.as_str());
    match server.auth_type {
        McpAuthType::None => None,
        McpAuthType::ApiKey => config.api_key.as_ref().map(|key| {
            let name = config
                .header_name
                .clone()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_owned());
            (name, key.expose_secret().to_owned())
        }),
        McpAuthType::Bearer | McpAuthType::Oauth2 => override_token.or(config.bearer_token.as_ref()).map(bearer),
    }
}

/// Outcome of `tools/call`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpCallResult {
    /// Content items.
    pub content: Vec<Value>,
    /// Whether the server flagged the call as failed.
    pub is_error: bool,
}

impl McpCallResult {
    /// Text items joined by newlines; other items as JSON.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => obj
                    .get("text")
                    .and_then(Value::as_str)
                    .map_or_else(|| item.to_string(), str::to_owned),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<McpToolInfo>,
}

/// Client for one server, bound to one caller's credentials.
#[derive(Debug)]
pub struct McpClient {
    http: reqwest::Client,
    url: String,
    server_name: String,
    auth: Option<(String, String)>,
    session: Mutex<Option<String>>,
}

impl McpClient {
    /// Client for `server` using the shared connection pool.
    pub fn new(http: reqwest::Client, server: &McpServer, connection: &ConnectionParams) -> Self {
        Self {
            http,
            url: server.url.trim_end_matches('/').to_owned(),
            server_name: server.name.clone(),
            auth: auth_header(server, connection),
            session: Mutex::new(None),
        }
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .header(USER_AGENT, concat!("parley/", env!("CARGO_PKG_VERSION")))
            .json(body);
        if let Some((name, value)) = &self.auth {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session) = self.session.lock().clone() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    async fn send(&self, body: &Value) -> ToolResult<reqwest::Response> {
        let response = self.post(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::McpStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        if let Some(session) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            *self.session.lock() = Some(session.to_owned());
        }
        Ok(response)
    }

    /// Send a request and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> ToolResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::now_v7().to_string(),
            "method": method,
            "params": params,
        });
        trace!(server = %self.server_name, method, "MCP request");
        let response = self.send(&body).await?;
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let text = response.text().await?;
        if is_sse {
            parse_sse_reply(&text)
        } else {
            parse_json_reply(serde_json::from_str(&text)?)
        }
    }

    /// Send a notification; the reply body is ignored.
    pub async fn notify(&self, method: &str) -> ToolResult<()> {
        let body = json!({"jsonrpc": "2.0", "method": method});
        let _ = self.send(&body).await?;
        Ok(())
    }

    /// `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self) -> ToolResult<Value> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "clientInfo": {"name": "parley", "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// The server's tool catalog.
    ///
    /// A failed handshake is logged and `tools/list` is tried anyway.
    pub async fn list_tools(&self) -> ToolResult<Vec<McpToolInfo>> {
        if let Err(e) = self.initialize().await {
            warn!(server = %self.server_name, error = %e, "MCP initialize failed, listing tools directly");
        }
        let result = self.request("tools/list", json!({})).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        let list: ToolList = serde_json::from_value(result)?;
        debug!(server = %self.server_name, count = list.tools.len(), "MCP tools listed");
        Ok(list.tools)
    }

    /// Call a tool by its original name.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> ToolResult<McpCallResult> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        if result.is_null() {
            return Ok(McpCallResult::default());
        }
        Ok(serde_json::from_value(result)?)
    }
}

fn rpc_error(error: &Value) -> ToolError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_owned);
    ToolError::McpRpc { message }
}

fn parse_json_reply(reply: Value) -> ToolResult<Value> {
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        return Err(rpc_error(error));
    }
    Ok(reply.get("result").cloned().unwrap_or(Value::Null))
}

fn parse_sse_reply(body: &str) -> ToolResult<Value> {
    let mut result = None;
    let mut error = None;
    for data in sse_data_lines(body) {
        let Ok(message) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if let Some(r) = message.get("result") {
            result = Some(r.clone());
        } else if let Some(e) = message.get("error").filter(|e| !e.is_null()) {
            error = Some(rpc_error(e));
        }
    }
    match (result, error) {
        (Some(r), _) => Ok(r),
        (None, Some(e)) => Err(e),
        (None, None) => Ok(Value::Null),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use parley_core::McpServerId;
    use parley_core::tools::McpAuthConfig;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn server(url: &str, auth_type: McpAuthType, auth_config: McpAuthConfig) -> McpServer {
        McpServer {
            id: McpServerId::from("srv-1"),
            name: "files".into(),
            url: url.into(),
            auth_type,
            auth_config,
            is_active: true,
        }
    }

    #[test]
    fn auth_header_rules() {
        let conn = ConnectionParams::default();
        assert!(auth_header(&server("u", McpAuthType::None, McpAuthConfig::default()), &conn).is_none());

        let key = McpAuthConfig {
            api_key: Some(SecretString::from("k1")),
            ..McpAuthConfig::default()
        };
        assert_eq!(
            auth_header(&server("u", McpAuthType::ApiKey, key), &conn),
            Some(("X-API-Key".into(), "k1".into()))
        );

        let custom = McpAuthConfig {
            api_key: Some(SecretString::from("k2")),
            header_name: Some("X-Token".into()),
            ..McpAuthConfig::default()
        };
        assert_eq!(
            auth_header(&server("u", McpAuthType::ApiKey, custom), &conn),
            Some(("X-Token".into(), "k2".into()))
        );

        let bearer = McpAuthConfig {
            bearer_token: Some(SecretString::from("configured")),
            ..McpAuthConfig::default()
        };
        let srv = server("u", McpAuthType::Oauth2, bearer);
        assert_eq!(
            auth_header(&srv, &conn).map(|(_, v)| v),
            Some("Bearer configured".into())
        );

        let mut conn = ConnectionParams::default();
        let _ = conn.mcp_tokens.insert("srv-1".into(), SecretString::from("per-user"));
        assert_eq!(auth_header(&srv, &conn).map(|(_, v)| v), Some("Bearer per-user".into()));
    }

    #[test]
    fn content_text_joins_items() {
        let result = McpCallResult {
            content: vec![
                json!({"type": "text", "text": "first"}),
                json!("second"),
                json!({"type": "image", "data": "AAA"}),
            ],
            is_error: false,
        };
        let text = result.text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[..2], ["first", "second"]);
        assert_eq!(serde_json::from_str::<Value>(lines[2]).unwrap(), json!({"type": "image", "data": "AAA"}));
    }

    #[test]
    fn sse_reply_takes_last_result() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"progress\"}\n\n\
                    data: not json\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"ok\":true}}\n\n";
        assert_eq!(parse_sse_reply(body).unwrap(), json!({"ok": true}));
        assert!(parse_sse_reply("").unwrap().is_null());
        assert_matches!(
            parse_sse_reply("data: {\"error\":{\"message\":\"denied\"}}\n\n"),
            Err(ToolError::McpRpc { message }) if message == "denied"
        );
    }

    #[tokio::test]
    async fn lists_and_calls_tools_over_http() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "sess-9")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": "1", "result": {"protocolVersion": PROTOCOL_VERSION}})),
            )
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .and(header("mcp-session-id", "sess-9"))
            .and(header("accept", "application/json, text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"jsonrpc\":\"2.0\",\"id\":\"2\",\"result\":{\"tools\":[{\"name\":\"read_file\",\"inputSchema\":{\"type\":\"object\"}}]}}\n\n",
                "text/event-stream",
            ))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call", "params": {"name": "read_file"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": "3",
                "result": {"content": [{"type": "text", "text": "hello"}]}
            })))
            .mount(&mock)
            .await;

        let srv = server(&mock.uri(), McpAuthType::None, McpAuthConfig::default());
        let client = McpClient::new(reqwest::Client::new(), &srv, &ConnectionParams::default());
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[0].input_schema, Some(json!({"type": "object"})));

        let result = client.call_tool("read_file", Map::new()).await.unwrap();
        assert_eq!(result.text(), "hello");
    }

    #[tokio::test]
    async fn error_status_and_rpc_errors() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": "1", "error": {"code": -32602, "message": "unknown tool"}
            })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock)
            .await;

        let srv = server(&mock.uri(), McpAuthType::None, McpAuthConfig::default());
        let client = McpClient::new(reqwest::Client::new(), &srv, &ConnectionParams::default());
        assert_matches!(
            client.call_tool("nope", Map::new()).await,
            Err(ToolError::McpRpc { message }) if message == "unknown tool"
        );
        assert_matches!(
            client.request("tools/list", json!({})).await,
            Err(ToolError::McpStatus { status: 500, .. })
        );
    }
}
