//! Turn sub-phase while streaming.

use serde::{Deserialize, Serialize};

/// Sub-phase of an assistant turn.
///
/// `Completed`, `Cancelled` and `Error` are terminal: once a turn reaches one
/// of them it must not change again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Request accepted by the backend.
    Started,
    /// Tokens are arriving.
    InProgress,
    /// Retrieving document chunks for a RAG answer.
    RagSearch,
    /// Web search tool is running.
    WebSearch,
    /// External MCP tool is running.
    McpCall,
    /// Backend-side code interpreter is running.
    CodeInterpreter,
    /// The model requested a tool call.
    ToolCall,
    /// A tool call finished and its result was sent back.
    ToolCallCompleted,
    /// Backend emitted a new output item.
    OutputItem,
    /// Model is reasoning.
    Reasoning,
    /// Long-running content (image) generation.
    ContentGeneration,
    /// Finished successfully.
    Completed,
    /// Stopped by the user.
    Cancelled,
    /// Finished with an error.
    Error,
}

impl StreamStatus {
    /// Whether this status ends the turn.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    /// Whether the status describes a numbered step, shown as `Step #n`
    /// when the backend sends no detail text.
    pub fn is_stepwise(self) -> bool {
        matches!(
            self,
            Self::WebSearch | Self::ToolCall | Self::OutputItem | Self::Reasoning
        )
    }
}
