//! Tool error types.
//!
//! Errors never leave the registry as `Err`: each tool turns them into the
//! error text the model sees.

use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments were missing or malformed.
    #[error("{message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// Transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Reply body could not be decoded.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status from a tool server.
    #[error("MCP server error ({status}): {body}")]
    McpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// JSON-RPC error object.
    #[error("MCP error: {message}")]
    McpRpc {
        /// Error message from the server.
        message: String,
    },

    /// The search backend rejected the request.
    #[error("search failed with status {status}: {body}")]
    Search {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// A required backend is not configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
