//! Web search tool and its backend seam.
//!
//! The tool validates the model's arguments, asks a [`WebSearchBackend`] for
//! results and renders them as a markdown block the model can cite.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{ConnectionParams, StreamStatus, ToolDefinition};
use parley_settings::SearchSettings;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::errors::{ToolError, ToolResult};
use crate::traits::ParleyTool;

/// Name of the web search tool.
pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

/// One search query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Query text.
    pub query: String,
    /// Maximum number of results.
    pub limit: u32,
    /// Whether result pages should be fetched in full.
    pub load_content: bool,
}

/// One search hit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResult {
    /// Page title.
    pub title: String,
    /// Page URL.
    pub url: String,
    /// Site domain.
    pub domain: String,
    /// Snippet.
    pub summary: Option<String>,
    /// Page text, when loaded.
    pub content: Option<String>,
}

/// Anything that can answer a web search.
#[async_trait]
pub trait WebSearchBackend: Send + Sync {
    /// Run a query with the caller's credentials.
    async fn search(&self, request: &SearchRequest, connection: &ConnectionParams) -> ToolResult<Vec<SearchResult>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    #[serde(flatten)]
    request: &'a SearchRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// JSON search API: `POST {base_url}/search`.
///
/// The caller's search key is sent as `Authorization: Api-Key {key}` and the
/// folder, when set, as `folderId`.
#[derive(Clone, Debug)]
pub struct HttpSearchBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSearchBackend {
    /// Backend for `base_url`.
    pub fn new(base_url: impl Into<String>) -> ToolResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl WebSearchBackend for HttpSearchBackend {
    async fn search(&self, request: &SearchRequest, connection: &ConnectionParams) -> ToolResult<Vec<SearchResult>> {
        let body = SearchBody {
            request,
            folder_id: connection.search_folder.as_deref(),
        };
        let mut builder = self.http.post(format!("{}/search", self.base_url)).json(&body);
        if let Some(key) = &connection.search_api_key {
            builder = builder.header(AUTHORIZATION, format!("Api-Key {}", key.expose_secret()));
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Search {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let reply: SearchReply = response.json().await?;
        Ok(reply.results)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────────────────────────────────────

/// Collapse line-break runs and keep at most `max_chars` characters.
fn clip_content(content: &str, max_chars: usize) -> String {
    content
        .split(['\n', '\r'])
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .chars()
        .take(max_chars)
        .collect()
}

/// Render results as the markdown block returned to the model.
pub fn format_results(results: &[SearchResult], max_content_length: usize) -> String {
    let blocks: Vec<String> = results
        .iter()
        .map(|r| {
            let content = r
                .content
                .as_deref()
                .map(|c| clip_content(c, max_content_length))
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "N/A".into());
            format!(
                "### Result\ntitle: {}\nurl: {}\ndomain: {}\nsummary: {}\ncontent:\n\"\"\"\n{content}\n\"\"\"",
                r.title,
                r.url,
                r.domain,
                r.summary.as_deref().filter(|s| !s.is_empty()).unwrap_or("N/A"),
            )
        })
        .collect();
    format!(
        "# Web search results\n\
         Please use this information to assist with your answer.\n\
         Always include a reference to the source of the information in your answer, using the format [title](url).\n\n{}",
        blocks.join("\n\n---\n\n")
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool
// ─────────────────────────────────────────────────────────────────────────────

/// `web_search` tool over a backend.
#[derive(Clone)]
pub struct WebSearchTool {
    backend: Arc<dyn WebSearchBackend>,
    settings: SearchSettings,
}

impl WebSearchTool {
    /// Tool bound to `backend`.
    pub fn new(backend: Arc<dyn WebSearchBackend>, settings: SearchSettings) -> Self {
        Self { backend, settings }
    }

    fn limit(&self, args: &Map<String, Value>) -> u32 {
        args.get("limit")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or(self.settings.default_limit)
            .clamp(1, self.settings.max_limit.max(1))
    }
}

#[async_trait]
impl ParleyTool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: WEB_SEARCH_TOOL_NAME.into(),
            description: "Search the web for relevant information".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "limit": {"type": "number", "description": "Maximum number of search results to return"}
                },
                "required": ["query"]
            }),
        }
    }

    fn status(&self) -> StreamStatus {
        StreamStatus::WebSearch
    }

    #[instrument(skip_all, fields(tool_call_id = call_id))]
    async fn call(
        &self,
        args: Map<String, Value>,
        call_id: &str,
        connection: &ConnectionParams,
    ) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::Validation {
                message: "Invalid 'query' argument for web search tool: N/A.".into(),
            })?;
        let request = SearchRequest {
            query: query.to_owned(),
            limit: self.limit(&args),
            load_content: true,
        };
        let results = self.backend.search(&request, connection).await?;
        debug!(query, count = results.len(), "web search finished");
        if results.is_empty() {
            return Ok(format!("No results found for query: \"{query}\""));
        }
        Ok(format_results(&results, self.settings.max_content_length))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
