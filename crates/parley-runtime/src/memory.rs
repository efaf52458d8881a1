//! In-memory collaborators for single-process deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use parley_core::{Chat, ChatId, ConnectionParams, DocumentId, McpServer, McpServerId, Message, MessageId, MessageRole, Model};
use tracing::debug;

use crate::collaborators::{ChatFile, ChunkQuery, ChunkSearch, DocumentChunk, EntityRepository, StorageService};
use crate::errors::RuntimeResult;

fn order_key(message: &Message) -> (DateTime<Utc>, &MessageId) {
    (message.created_at, &message.id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Entities {
    chats: HashMap<ChatId, Chat>,
    messages: HashMap<MessageId, Message>,
    models: HashMap<String, Model>,
    mcp_servers: HashMap<McpServerId, McpServer>,
    files: HashMap<String, ChatFile>,
}

/// [`EntityRepository`] over hash maps.
#[derive(Default)]
pub struct InMemoryRepository {
    entities: RwLock<Entities>,
}

impl InMemoryRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add catalog models.
    #[must_use]
    pub fn with_models(self, models: impl IntoIterator<Item = Model>) -> Self {
        {
            let mut entities = self.entities.write();
            for model in models {
                let _ = entities.models.insert(model.model_id.clone(), model);
            }
        }
        self
    }

    /// Add MCP servers.
    #[must_use]
    pub fn with_mcp_servers(self, servers: impl IntoIterator<Item = McpServer>) -> Self {
        {
            let mut entities = self.entities.write();
            for server in servers {
                let _ = entities.mcp_servers.insert(server.id.clone(), server);
            }
        }
        self
    }

    /// Insert a chat.
    pub fn insert_chat(&self, chat: Chat) {
        let _ = self.entities.write().chats.insert(chat.id.clone(), chat);
    }

    /// Insert a message.
    pub fn insert_message(&self, message: Message) {
        let _ = self.entities.write().messages.insert(message.id.clone(), message);
    }

    /// Current state of a chat.
    pub fn chat_snapshot(&self, id: &ChatId) -> Option<Chat> {
        self.entities.read().chats.get(id).cloned()
    }

    /// All messages of a chat, oldest first.
    pub fn chat_messages(&self, chat_id: &ChatId) -> Vec<Message> {
        let entities = self.entities.read();
        let mut messages: Vec<Message> = entities.messages.values().filter(|m| &m.chat_id == chat_id).cloned().collect();
        messages.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
        messages
    }

    /// All file records.
    pub fn files(&self) -> Vec<ChatFile> {
        self.entities.read().files.values().cloned().collect()
    }
}

#[async_trait]
impl EntityRepository for InMemoryRepository {
    async fn chat(&self, id: &ChatId) -> RuntimeResult<Option<Chat>> {
        Ok(self.chat_snapshot(id))
    }

    async fn save_chat(&self, chat: &Chat) -> RuntimeResult<()> {
        self.insert_chat(chat.clone());
        Ok(())
    }

    async fn message(&self, id: &MessageId) -> RuntimeResult<Option<Message>> {
        Ok(self.entities.read().messages.get(id).cloned())
    }

    async fn save_message(&self, message: &Message) -> RuntimeResult<()> {
        self.insert_message(message.clone());
        Ok(())
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> RuntimeResult<()> {
        let mut entities = self.entities.write();
        for id in ids {
            let _ = entities.messages.remove(id);
        }
        Ok(())
    }

    async fn context_messages(
        &self,
        chat_id: &ChatId,
        before: Option<&Message>,
        limit: usize,
    ) -> RuntimeResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .chat_messages(chat_id)
            .into_iter()
            .filter(|m| m.linked_to_message_id.is_none())
            .filter(|m| before.is_none_or(|b| m.id != b.id && order_key(m) <= order_key(b)))
            .collect();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn messages_after(&self, message: &Message) -> RuntimeResult<Vec<Message>> {
        Ok(self
            .chat_messages(&message.chat_id)
            .into_iter()
            .filter(|m| m.linked_to_message_id.is_none() && m.id != message.id && order_key(m) >= order_key(message))
            .collect())
    }

    async fn next_message_with_role(&self, message: &Message, roles: &[MessageRole]) -> RuntimeResult<Option<Message>> {
        Ok(self
            .chat_messages(&message.chat_id)
            .into_iter()
            .find(|m| m.id != message.id && order_key(m) >= order_key(message) && roles.contains(&m.role)))
    }

    async fn model(&self, model_id: &str) -> RuntimeResult<Option<Model>> {
        Ok(self.entities.read().models.get(model_id).cloned())
    }

    async fn mcp_servers(&self, ids: &[McpServerId]) -> RuntimeResult<Vec<McpServer>> {
        let entities = self.entities.read();
        Ok(ids
            .iter()
            .filter_map(|id| entities.mcp_servers.get(id))
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn save_file(&self, file: &ChatFile) -> RuntimeResult<()> {
        let _ = self.entities.write().files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn message_files(&self, message_ids: &[MessageId]) -> RuntimeResult<Vec<ChatFile>> {
        Ok(self
            .entities
            .read()
            .files
            .values()
            .filter(|f| message_ids.contains(&f.message_id))
            .cloned()
            .collect())
    }

    async fn delete_files(&self, ids: &[String]) -> RuntimeResult<()> {
        let mut entities = self.entities.write();
        for id in ids {
            let _ = entities.files.remove(id);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// [`StorageService`] keeping objects in memory.
pub struct InMemoryStorage {
    base_url: String,
    objects: DashMap<String, (String, Vec<u8>)>,
}

impl InMemoryStorage {
    /// Storage whose URLs start with `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            objects: DashMap::new(),
        }
    }

    /// Stored object bytes.
    pub fn object(&self, file_name: &str) -> Option<Vec<u8>> {
        self.objects.get(file_name).map(|o| o.1.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new("/files")
    }
}

#[async_trait]
impl StorageService for InMemoryStorage {
    async fn upload(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> RuntimeResult<String> {
        let file_name = format!("{chat_id}/{message_id}/{name}");
        debug!(file_name, size = bytes.len(), "stored object");
        let _ = self.objects.insert(file_name.clone(), (mime_type.to_owned(), bytes));
        Ok(file_name)
    }

    fn file_url(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.base_url)
    }

    async fn delete_files(&self, file_names: &[String]) -> RuntimeResult<()> {
        for name in file_names {
            let _ = self.objects.remove(name);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk search
// ─────────────────────────────────────────────────────────────────────────────

/// [`ChunkSearch`] over a fixed chunk set, in insertion order. Queries are
/// recorded.
#[derive(Default)]
pub struct InMemoryChunkSearch {
    chunks: Vec<DocumentChunk>,
    queries: Mutex<Vec<(Vec<DocumentId>, String, ChunkQuery)>>,
}

impl InMemoryChunkSearch {
    /// Search over `chunks`.
    pub fn new(chunks: Vec<DocumentChunk>) -> Self {
        Self {
            chunks,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries seen so far.
    pub fn queries(&self) -> Vec<(Vec<DocumentId>, String, ChunkQuery)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ChunkSearch for InMemoryChunkSearch {
    async fn find_chunks(
        &self,
        document_ids: &[DocumentId],
        query: &str,
        options: ChunkQuery,
        _connection: &ConnectionParams,
    ) -> RuntimeResult<Vec<DocumentChunk>> {
        self.queries.lock().push((document_ids.to_vec(), query.to_owned(), options));
        Ok(self
            .chunks
            .iter()
            .filter(|c| document_ids.contains(&c.document_id))
            .take(options.limit)
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
