//! # parley-tools
//!
//! Tools a model can call mid-stream.
//!
//! - [`WebSearchTool`]: queries a configured search backend and renders the
//!   hits as markdown
//! - [`McpTool`](mcp::McpTool): wraps one tool of an MCP server reached over
//!   Streamable HTTP, advertised under a synthetic name
//! - [`ToolRegistry`]: composes the tools enabled on a chat into a
//!   [`RequestTools`] snapshot that providers drive through
//!   [`ToolExecutor`](parley_llm::ToolExecutor)
//!
//! Tool failures never abort a stream. They come back to the model as
//! error-text results.

#![deny(unsafe_code)]

pub mod errors;
pub mod mcp;
pub mod naming;
pub mod registry;
pub mod traits;
pub mod web_search;

pub use errors::{ToolError, ToolResult};
pub use naming::{McpToolRef, SyntheticNameMap};
pub use registry::{RequestTools, ToolRegistry};
pub use traits::ParleyTool;
pub use web_search::{HttpSearchBackend, WebSearchBackend, WebSearchTool};
