//! Cross-crate error taxonomy.
//!
//! Each crate has its own `thiserror` enum. Every one of them maps onto an
//! [`ErrorKind`], which decides how the orchestrator reacts.

use serde::{Deserialize, Serialize};

/// How an error is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Disabled or misconfigured provider. Fatal, never retried.
    Configuration,
    /// Network or rate-limit failure. Retried inside the adapter first.
    TransientProvider,
    /// One tool call failed. Turned into an error-text tool result.
    ToolExecution,
    /// Terminal for the current turn only.
    Stream,
    /// User cancellation. Not an error, reported as a status.
    Cancellation,
    /// Request payload too large for the model (RAG shrinks and retries).
    ContextTooLarge,
    /// Invalid request (missing chat, wrong role, ...).
    Validation,
    /// Storage or broadcast collaborator failure.
    Persistence,
}

impl ErrorKind {
    /// Whether retrying the same request might succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientProvider | Self::ContextTooLarge)
    }

    /// Whether the error must be surfaced immediately.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration | Self::Validation)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::TransientProvider => "transient_provider",
            Self::ToolExecution => "tool_execution",
            Self::Stream => "stream",
            Self::Cancellation => "cancellation",
            Self::ContextTooLarge => "context_too_large",
            Self::Validation => "validation",
            Self::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_is_fatal_not_retryable() {
        assert!(ErrorKind::Configuration.is_fatal());
        assert!(!ErrorKind::Configuration.is_retryable());
    }

    #[test]
    fn transient_is_retryable() {
        assert!(ErrorKind::TransientProvider.is_retryable());
        assert!(!ErrorKind::TransientProvider.is_fatal());
    }

    #[test]
    fn display_matches_serde() {
        let json = serde_json::to_string(&ErrorKind::ContextTooLarge).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorKind::ContextTooLarge));
    }
}
