//! Interfaces to the systems the orchestrator drives but does not own:
//! entity storage, file storage and document chunk search.

use async_trait::async_trait;
use parley_core::{Chat, ChatId, ConnectionParams, DocumentId, McpServer, McpServerId, Message, MessageId, MessageRole, Model};
use serde::{Deserialize, Serialize};

use crate::errors::RuntimeResult;

// ─────────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────────

/// A stored file attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFile {
    /// File record ID.
    pub id: String,
    /// Owning chat.
    pub chat_id: ChatId,
    /// Owning message.
    pub message_id: MessageId,
    /// Object name in storage.
    pub file_name: String,
    /// Name the file was uploaded with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_name: Option<String>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Persistent chats, messages, models, MCP servers and file records.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Chat by ID.
    async fn chat(&self, id: &ChatId) -> RuntimeResult<Option<Chat>>;

    /// Insert or replace a chat.
    async fn save_chat(&self, chat: &Chat) -> RuntimeResult<()>;

    /// Message by ID.
    async fn message(&self, id: &MessageId) -> RuntimeResult<Option<Message>>;

    /// Insert or replace a message.
    async fn save_message(&self, message: &Message) -> RuntimeResult<()>;

    /// Remove messages. Unknown IDs are ignored.
    async fn delete_messages(&self, ids: &[MessageId]) -> RuntimeResult<()>;

    /// Up to `limit` most recent non-branch messages of a chat, oldest
    /// first. With `before`, only messages created no later than it,
    /// excluding it.
    async fn context_messages(
        &self,
        chat_id: &ChatId,
        before: Option<&Message>,
        limit: usize,
    ) -> RuntimeResult<Vec<Message>>;

    /// Non-branch messages created at or after `message`, excluding it,
    /// oldest first.
    async fn messages_after(&self, message: &Message) -> RuntimeResult<Vec<Message>>;

    /// First message created at or after `message` whose role is one of
    /// `roles`, excluding `message` itself.
    async fn next_message_with_role(&self, message: &Message, roles: &[MessageRole]) -> RuntimeResult<Option<Message>>;

    /// Catalog entry for a model.
    async fn model(&self, model_id: &str) -> RuntimeResult<Option<Model>>;

    /// Active MCP servers among `ids`.
    async fn mcp_servers(&self, ids: &[McpServerId]) -> RuntimeResult<Vec<McpServer>>;

    /// Record an uploaded file.
    async fn save_file(&self, file: &ChatFile) -> RuntimeResult<()>;

    /// File records attached to any of `message_ids`.
    async fn message_files(&self, message_ids: &[MessageId]) -> RuntimeResult<Vec<ChatFile>>;

    /// Remove file records.
    async fn delete_files(&self, ids: &[String]) -> RuntimeResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// File storage
// ─────────────────────────────────────────────────────────────────────────────

/// Object storage for uploaded images.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Store `bytes` and return the object name.
    async fn upload(&self, chat_id: &ChatId, message_id: &MessageId, name: &str, mime_type: &str, bytes: Vec<u8>)
        -> RuntimeResult<String>;

    /// Public URL of an object.
    fn file_url(&self, file_name: &str) -> String;

    /// Remove objects. Missing objects are ignored.
    async fn delete_files(&self, file_names: &[String]) -> RuntimeResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk search
// ─────────────────────────────────────────────────────────────────────────────

/// A document fragment returned by similarity search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    /// Chunk ID.
    pub id: String,
    /// Owning document.
    pub document_id: DocumentId,
    /// Owning document name.
    #[serde(default)]
    pub document_name: Option<String>,
    /// Page number.
    pub page: u32,
    /// Position on the page.
    pub page_index: u32,
    /// Text.
    pub content: String,
}

/// Search options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkQuery {
    /// Maximum chunks returned.
    pub limit: usize,
    /// Return whole pages around matching chunks.
    pub load_full_page: bool,
}

/// Similarity search over processed documents.
#[async_trait]
pub trait ChunkSearch: Send + Sync {
    /// Chunks of `document_ids` most relevant to `query`.
    async fn find_chunks(
        &self,
        document_ids: &[DocumentId],
        query: &str,
        options: ChunkQuery,
        connection: &ConnectionParams,
    ) -> RuntimeResult<Vec<DocumentChunk>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Caller
// ─────────────────────────────────────────────────────────────────────────────

/// Who is asking: credentials plus per-user defaults.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Backend credentials.
    pub connection: ConnectionParams,
    /// The user's default model, used when a chat names none.
    pub default_model_id: Option<String>,
}

impl RequestContext {
    /// Context with credentials only.
    pub fn new(connection: ConnectionParams) -> Self {
        Self {
            connection,
            default_model_id: None,
        }
    }
}

/// An image attached to a new user turn.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    /// Original file name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// MIME type.
    pub mime_type: String,
    /// Base64 payload, optionally as a data URL.
    pub bytes_base64: String,
}

/// Entry in a delete result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    /// Deleted message.
    pub id: MessageId,
    /// Turn it branched from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_to_message_id: Option<MessageId>,
}

