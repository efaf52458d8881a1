//! # parley-core
//!
//! Shared vocabulary for every parley crate:
//!
//! - **Branded IDs**: `ChatId`, `MessageId`, `DocumentId`, `McpServerId`
//! - **Chats and messages**: [`chat::Chat`], [`messages::Message`] and the
//!   provider-facing [`messages::ModelMessage`] history entry
//! - **Streaming**: [`events::ProviderEvent`] (start/progress/complete/error) and
//!   [`status::StreamStatus`]
//! - **Tools**: definitions, calls and results embedded in message metadata
//! - **Connection parameters**: per-request credentials behind `secrecy`
//! - **Errors**: the cross-crate [`errors::ErrorKind`] taxonomy
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod chat;
pub mod connection;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod models;
pub mod retry;
pub mod status;
pub mod tools;

pub use chat::{Chat, ChatSettings, ChatTool, ToolType};
pub use connection::ConnectionParams;
pub use errors::ErrorKind;
pub use events::{ModelResponse, ProgressUpdate, ProviderEvent};
pub use ids::{ChatId, DocumentId, McpServerId, MessageId};
pub use messages::{ContentPart, Message, MessageBody, MessageMetadata, MessageRole, ModelMessage};
pub use models::{CustomModelSettings, CustomProtocol, Model, ModelFeature, ModelType};
pub use status::StreamStatus;
pub use tools::{McpServer, ToolCallRecord, ToolDefinition, ToolResultRecord};
