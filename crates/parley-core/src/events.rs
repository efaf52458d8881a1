//! Provider stream events.
//!
//! A provider stream yields `Result<ProviderEvent, E>` items in a strict order:
//! exactly one [`ProviderEvent::Start`], any number of
//! [`ProviderEvent::Progress`], then exactly one terminal item, either
//! [`ProviderEvent::Complete`] or an `Err`. Nothing follows the terminal item.

use serde::{Deserialize, Serialize};

use crate::messages::MessageMetadata;
use crate::status::StreamStatus;
use crate::tools::{ToolCallRecord, ToolResultRecord};

/// Final answer of a chat completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    /// Full text content.
    pub content: String,
    /// Usage, tool records and request IDs.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl ModelResponse {
    /// Response with content only.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: MessageMetadata::default(),
        }
    }
}

/// One incremental update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressUpdate {
    /// Text delta (may be empty for status-only updates).
    pub token: String,
    /// Sub-phase, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StreamStatus>,
    /// Human-readable detail for the status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Backend event sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    /// Backend request ID (background jobs report it with `Started`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Tool calls requested in this step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool results produced in this step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolResultRecord>,
    /// Ask the consumer to flush regardless of throttling.
    pub force: bool,
}

impl ProgressUpdate {
    /// A plain text delta.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// A status change that must be flushed immediately.
    pub fn forced_status(status: StreamStatus) -> Self {
        Self {
            status: Some(status),
            force: true,
            ..Self::default()
        }
    }
}

/// Non-error stream event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// Stream opened.
    Start,
    /// Incremental update.
    Progress(ProgressUpdate),
    /// Terminal success.
    Complete(ModelResponse),
}

impl ProviderEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}
