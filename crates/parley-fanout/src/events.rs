//! Events delivered to subscribers and the pointers carried on the wire.
//!
//! Message snapshots never travel through the broadcast channel itself. The
//! publisher writes the snapshot to the cache under [`message_key`], then
//! broadcasts a small [`MessagePointer`]; every instance resolves the pointer
//! against the cache.

use chrono::{DateTime, Utc};
use parley_core::{Chat, ChatId, DocumentId, Message, MessageId, MessageRole};
use serde::{Deserialize, Serialize};

/// Error sent when a pointer's snapshot is missing from the cache.
pub const SNAPSHOT_MISSING: &str = "Sync error: message not found in cache";

/// Cache key of a message snapshot.
pub fn message_key(message_id: &str) -> String {
    format!("message:{message_id}")
}

/// Per-chat event pushed to connected clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatEvent {
    /// A message snapshot.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Owning chat.
        chat_id: ChatId,
        /// The message.
        message: Box<Message>,
        /// The chat as of this snapshot.
        chat: Box<Chat>,
        /// Whether generation is still running.
        streaming: bool,
    },
    /// A chat-level failure.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Owning chat.
        chat_id: ChatId,
        /// Error text.
        error: String,
    },
}

impl ChatEvent {
    /// Snapshot event.
    pub fn message(chat: Chat, message: Message, streaming: bool) -> Self {
        Self::Message {
            chat_id: chat.id.clone(),
            message: Box::new(message),
            chat: Box::new(chat),
            streaming,
        }
    }

    /// Chat this event belongs to.
    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::Message { chat_id, .. } | Self::Error { chat_id, .. } => chat_id,
        }
    }

    /// Error text shown to the client: the error event's text, or the
    /// content of an error-role message.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Message { message, .. } if message.role == MessageRole::Error => Some(&message.content),
            Self::Message { .. } => None,
        }
    }
}

/// Document processing status update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    /// Document ID.
    pub document_id: DocumentId,
    /// Processing status, e.g. `upload`, `parsing`, `ready`, `error`.
    pub status: String,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_info: Option<String>,
    /// Progress in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_progress: Option<f32>,
    /// Generated summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Broadcast payload on the message channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePointer {
    /// Owning chat.
    pub chat_id: ChatId,
    /// Message whose snapshot is cached.
    pub message_id: MessageId,
    /// Whether generation is still running.
    #[serde(default)]
    pub streaming: bool,
}

/// Broadcast payload on the error channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPointer {
    /// Owning chat.
    pub chat_id: ChatId,
    /// Error text.
    #[serde(default)]
    pub error: Option<String>,
}

/// Cached snapshot body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    /// The message.
    pub message: Message,
    /// The chat.
    pub chat: Chat,
}
