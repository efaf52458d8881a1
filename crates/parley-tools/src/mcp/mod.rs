//! MCP (Model Context Protocol) tool servers: client, catalog cache and the
//! tool wrapper.

pub mod catalog;
pub mod client;
pub mod tool;

pub use catalog::McpCatalog;
pub use client::{McpCallResult, McpClient};
pub use tool::McpTool;
