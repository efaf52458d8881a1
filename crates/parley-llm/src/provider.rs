//! # Provider Adapter
//!
//! Core abstraction for inference backends. Every backend (OpenAI chat
//! completions, OpenAI Responses, custom REST endpoints) implements
//! [`ProviderAdapter`] to expose one uniform surface: synchronous completion,
//! streaming, embeddings, model catalog, costs, cancellation and health.
//!
//! Streams yield `Result<ProviderEvent, ProviderError>`: exactly one
//! [`ProviderEvent::Start`], any number of [`ProviderEvent::Progress`], then
//! exactly one terminal item, [`ProviderEvent::Complete`] or an `Err`. The
//! consumer halts generation by dropping the stream.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::Stream;
use parley_core::errors::ErrorKind;
use parley_core::messages::{ModelMessage, Usage};
use parley_core::{
    McpServer, Model, ModelResponse, ProviderEvent, StreamStatus, ToolCallRecord, ToolDefinition,
    ToolResultRecord, ToolType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error_parsing::is_context_too_large_message;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed stream returned by [`ProviderAdapter::stream_chat`].
pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SSE stream parsing failed.
    #[error("SSE parse error: {message}")]
    SseParse {
        /// Error description.
        message: String,
    },

    /// Missing or rejected credentials.
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// HTTP 429 from the backend.
    #[error("429 {message}")]
    RateLimited {
        /// Suggested retry delay in milliseconds (0 when the backend gave none).
        retry_after_ms: u64,
        /// Error description.
        message: String,
    },

    /// Backend returned an error status.
    #[error("Request failed with status code {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Backend-specific error code.
        code: Option<String>,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// No data arrived within the idle timeout.
    #[error("Stream idle for {after_ms}ms")]
    Timeout {
        /// Idle timeout that elapsed.
        after_ms: u64,
    },

    /// The adapter cannot perform the operation.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// Operation name.
        operation: String,
    },

    /// Request was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ProviderError {
    /// Shorthand for [`ProviderError::Other`].
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Shorthand for [`ProviderError::Unsupported`].
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::SseParse { .. }
            | Self::Auth { .. }
            | Self::Unsupported { .. }
            | Self::Cancelled
            | Self::Json(_)
            | Self::Other { .. } => false,
        }
    }

    /// Whether the backend answered HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status == 429,
            Self::Http(e) => e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS),
            _ => false,
        }
    }

    /// Whether the request payload was too large for the model.
    ///
    /// Matches `429 request too large` and `failed with status code 400`
    /// in the rendered error text.
    pub fn is_context_too_large(&self) -> bool {
        is_context_too_large_message(&self.to_string())
    }

    /// Extract retry-after delay in milliseconds, if available.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Error category string for logs and events.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) | Self::Timeout { .. } => "network",
            Self::Json(_) | Self::SseParse { .. } => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Unsupported { .. } => "unsupported",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }

    /// Cross-crate error kind.
    pub fn kind(&self) -> ErrorKind {
        if self.is_context_too_large() {
            ErrorKind::ContextTooLarge
        } else if matches!(self, Self::Cancelled) {
            ErrorKind::Cancellation
        } else if matches!(self, Self::Auth { .. } | Self::Unsupported { .. }) {
            ErrorKind::Configuration
        } else if self.is_retryable() {
            ErrorKind::TransientProvider
        } else {
            ErrorKind::Stream
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool execution seam
// ─────────────────────────────────────────────────────────────────────────────

/// Executes tool calls requested by a model mid-stream.
///
/// Built once per request. Failures are returned as error-text results,
/// never as `Err`, so a failing tool never aborts the stream.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions advertised to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Status shown while the named tool runs.
    fn status_for(&self, name: &str) -> StreamStatus;

    /// Run one call.
    async fn execute(&self, call: &ToolCallRecord) -> ToolResultRecord;
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests and responses
// ─────────────────────────────────────────────────────────────────────────────

/// One chat request.
#[derive(Clone, Default)]
pub struct CompletionRequest {
    /// Backend model ID.
    pub model_id: String,
    /// System prompt prepended to the history.
    pub system_prompt: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Output token limit.
    pub max_tokens: Option<u32>,
    /// Nucleus sampling.
    pub top_p: Option<f32>,
    /// Reasoning on/off for models that support it.
    pub thinking: Option<bool>,
    /// Reasoning budget in tokens.
    pub thinking_budget: Option<u32>,
    /// Tools the model may call.
    pub tools: Option<Arc<dyn ToolExecutor>>,
    /// MCP servers attached to the chat.
    pub mcp_servers: Vec<McpServer>,
    /// Tools the backend runs itself when it can (Responses web search,
    /// code interpreter). Backends without hosted tools ignore this list.
    pub hosted_tools: Vec<ToolType>,
    /// Correlation ID for logs (the assistant message ID).
    pub trace_id: Option<String>,
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("model_id", &self.model_id)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("tools", &self.tool_definitions().len())
            .field("mcp_servers", &self.mcp_servers.len())
            .field("hosted_tools", &self.hosted_tools)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

impl CompletionRequest {
    /// Request for a model with no other options set.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    /// Tool definitions, empty when no executor is attached.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.as_ref().map(|t| t.definitions()).unwrap_or_default()
    }
}

/// Embeddings request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingsRequest {
    /// Embedding model ID.
    pub model_id: String,
    /// Text to embed.
    pub input: String,
    /// Requested vector size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

/// Embeddings response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingsResponse {
    /// The vector.
    pub embedding: Vec<f32>,
    /// Token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One line of a cost breakdown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    /// Day the cost was incurred.
    pub date: NaiveDate,
    /// Amount.
    pub amount: f64,
    /// Currency code.
    pub currency: String,
    /// Billed item, e.g. a model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_item: Option<String>,
}

/// Cost breakdown, or an explanation of why none is available.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCostInfo {
    /// Period start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// Period end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Cost lines.
    pub costs: Vec<CostEntry>,
    /// Set when costs are unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageCostInfo {
    /// Empty breakdown carrying an explanation.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Provider status for admin surfaces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Provider ID, e.g. `OPEN_AI`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the last connection test succeeded (or no test was run).
    pub is_connected: bool,
    /// Whether [`ProviderAdapter::costs`] returns real data.
    pub costs_info_available: bool,
    /// Free-form details, including `error` on failure.
    #[serde(default)]
    pub details: Map<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter trait
// ─────────────────────────────────────────────────────────────────────────────

/// Core provider adapter trait.
///
/// Implementors must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider ID (e.g. `"OPEN_AI"`).
    fn provider_id(&self) -> &str;

    /// Run a request to completion and return the final answer.
    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse>;

    /// Stream a response.
    ///
    /// The returned stream honors the four-event contract. Dropping it stops
    /// polling the backend.
    fn stream_chat(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream;

    /// Compute an embedding vector.
    async fn embeddings(&self, request: &EmbeddingsRequest) -> ProviderResult<EmbeddingsResponse> {
        let _ = request;
        Err(ProviderError::unsupported("embeddings"))
    }

    /// Model catalog keyed by model ID.
    async fn models(&self) -> ProviderResult<HashMap<String, Model>> {
        Ok(HashMap::new())
    }

    /// Cost breakdown for a period.
    async fn costs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<UsageCostInfo> {
        Ok(UsageCostInfo {
            start: Some(start),
            end: Some(end),
            ..UsageCostInfo::unavailable("Cost information is not available for this provider")
        })
    }

    /// Cancel an in-flight backend request.
    async fn stop_request(&self, request_id: &str) -> ProviderResult<()> {
        let _ = request_id;
        Err(ProviderError::unsupported("stop_request"))
    }

    /// Whether [`stop_request`](Self::stop_request) is implemented.
    fn supports_cancellation(&self) -> bool {
        false
    }

    /// Provider status, optionally testing the connection.
    async fn info(&self, test_connection: bool) -> ProviderResult<ProviderInfo>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
