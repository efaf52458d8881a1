//! Messages (turns) and the provider-facing history entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, DocumentId, MessageId};
use crate::status::StreamStatus;
use crate::tools::{ToolCallRecord, ToolResultRecord};

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user input.
    User,
    /// Model output.
    Assistant,
    /// System instructions.
    System,
    /// Terminal failure shown in place of an answer.
    Error,
}

/// One part of structured message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "contentType", rename_all = "lowercase")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        content: String,
    },
    /// An image, either inline (base64 / data URL) or by stored file reference.
    Image {
        /// Stored file name in object storage.
        #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        /// MIME type, e.g. `image/png`.
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Inline payload: raw base64 or a `data:` URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Publicly reachable URL of the stored file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// A video reference. Most chat backends cannot consume it.
    Video {
        /// Stored file name.
        #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        /// MIME type.
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentPart {
    /// Text part shorthand.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }
}

/// Body of a history entry: plain text or ordered parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    /// Plain text.
    Text(String),
    /// Multi-part content.
    Parts(Vec<ContentPart>),
}

impl MessageBody {
    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Parts(p) => p.is_empty(),
        }
    }

    /// Convert into a part list, wrapping plain text in a text part.
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(s) => vec![ContentPart::text(s)],
            Self::Parts(p) => p,
        }
    }
}

impl From<&str> for MessageBody {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MessageBody {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A history entry as handed to a provider adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Author.
    pub role: MessageRole,
    /// Content.
    pub body: MessageBody,
    /// Ordering timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ModelMessage {
    /// Build an entry without a timestamp.
    pub fn new(role: MessageRole, body: impl Into<MessageBody>) -> Self {
        Self {
            role,
            body: body.into(),
            timestamp: None,
        }
    }
}

/// Token usage reported by a backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

/// A document chunk cited by a RAG answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantChunk {
    /// Chunk ID.
    pub id: String,
    /// Relevance score in `[0, 1]`.
    pub relevance: f64,
    /// Owning document.
    pub document_id: DocumentId,
    /// Owning document name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    /// Page number.
    #[serde(default)]
    pub page: u32,
    /// Index within the page.
    #[serde(default)]
    pub page_index: u32,
    /// Chunk text.
    pub content: String,
}

/// Per-message metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    /// Token usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Tool results.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolResultRecord>,
    /// Tool calls.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Backend request ID for background jobs (used by cancel).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Last backend event sequence number seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence_number: Option<u64>,
    /// Documents attached to a RAG question.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<DocumentId>,
    /// Step-by-step analysis of a RAG answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// Chunks cited by a RAG answer.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relevant_chunks: Vec<RelevantChunk>,
}

impl MessageMetadata {
    /// Overlay every field set in `other` onto `self`.
    pub fn merge_from(&mut self, other: MessageMetadata) {
        if other.usage.is_some() {
            self.usage = other.usage;
        }
        if other.request_id.is_some() {
            self.request_id = other.request_id;
        }
        if other.last_sequence_number.is_some() {
            self.last_sequence_number = other.last_sequence_number;
        }
        if other.analysis.is_some() {
            self.analysis = other.analysis;
        }
        if !other.document_ids.is_empty() {
            self.document_ids = other.document_ids;
        }
        if !other.relevant_chunks.is_empty() {
            self.relevant_chunks = other.relevant_chunks;
        }
        self.merge_tool_records(other.tool_calls, other.tools);
    }

    /// Append tool calls and results, skipping call IDs already recorded.
    pub fn merge_tool_records(&mut self, calls: Vec<ToolCallRecord>, results: Vec<ToolResultRecord>) {
        for call in calls {
            if !self.tool_calls.iter().any(|c| c.call_id == call.call_id) {
                self.tool_calls.push(call);
            }
        }
        for result in results {
            if !self.tools.iter().any(|r| r.call_id == result.call_id) {
                self.tools.push(result);
            }
        }
    }
}

/// A persisted message (turn).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message ID.
    pub id: MessageId,
    /// Owning chat.
    pub chat_id: ChatId,
    /// Author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Structured content parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_content: Option<Vec<ContentPart>>,
    /// Model actually used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Display name of that model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Streaming sub-phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StreamStatus>,
    /// Human-readable status detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_info: Option<String>,
    /// Metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    /// Set when this turn is a parallel branch of another turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_to_message_id: Option<MessageId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build a fresh message with a new ID and the current time.
    pub fn new(chat_id: ChatId, role: MessageRole, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            chat_id,
            role,
            content: content.into(),
            json_content: None,
            model_id: None,
            model_name: None,
            status: None,
            status_info: None,
            metadata: None,
            linked_to_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the model this message belongs to.
    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self.model_name = Some(model_name.into());
        self
    }

    /// Whether the turn has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.role == MessageRole::Error || self.status.is_some_and(StreamStatus::is_terminal)
    }

    /// Document IDs attached to this turn, if any.
    pub fn document_ids(&self) -> &[DocumentId] {
        match &self.metadata {
            Some(m) => &m.document_ids,
            None => &[],
        }
    }

    /// Mutable metadata, created on first use.
    pub fn metadata_mut(&mut self) -> &mut MessageMetadata {
        self.metadata.get_or_insert_with(MessageMetadata::default)
    }

    /// Provider-facing history entry: structured parts when present, text otherwise.
    pub fn to_model_message(&self) -> ModelMessage {
        let body = match &self.json_content {
            Some(parts) if !parts.is_empty() => MessageBody::Parts(parts.clone()),
            _ => MessageBody::Text(self.content.clone()),
        };
        ModelMessage {
            role: self.role,
            body,
            timestamp: Some(self.created_at),
        }
    }
}
