//! Runtime error types.

use parley_core::ErrorKind;
use parley_fanout::FanOutError;
use parley_gateway::GatewayError;

/// Request rejected before any work started. The messages are shown to
/// users verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No chat ID in the request.
    #[error("Chat ID is required")]
    ChatIdRequired,
    /// Chat does not exist.
    #[error("Chat not found")]
    ChatNotFound,
    /// Neither the chat nor the caller names a model.
    #[error("Model must be defined for the chat or user")]
    ModelUndefined,
    /// Model is not in the catalog.
    #[error("Model not found or not accessible")]
    ModelNotFound,
    /// Message does not exist.
    #[error("Message not found")]
    MessageNotFound,
    /// Switch-model on a user turn.
    #[error("User messages cannot be switched")]
    SwitchUserMessage,
    /// Edit on a non-user turn.
    #[error("Only user messages can be edited")]
    EditNonUserMessage,
    /// Branch from a user turn.
    #[error("User messages cannot be used for calling others")]
    BranchFromUserMessage,
}

/// Errors that can occur while running a message operation.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Invalid request.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Provider routing or provider failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Entity repository failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// File storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Document chunk search failure.
    #[error("Search error: {0}")]
    Search(String),

    /// Fan-out failure.
    #[error(transparent)]
    FanOut(#[from] FanOutError),

    /// Model answer could not be interpreted.
    #[error("Invalid model answer: {0}")]
    InvalidAnswer(String),

    /// Internal / unexpected error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Error category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Gateway(e) => match e {
                GatewayError::Provider(p) => p.category(),
                _ => "configuration",
            },
            Self::Persistence(_) => "persistence",
            Self::Storage(_) => "storage",
            Self::Search(_) => "search",
            Self::FanOut(_) => "fanout",
            Self::InvalidAnswer(_) => "invalid_answer",
            Self::Internal(_) => "internal",
        }
    }

    /// Cross-crate error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Gateway(e) => e.kind(),
            Self::Persistence(_) | Self::Storage(_) | Self::FanOut(_) => ErrorKind::Persistence,
            Self::Search(_) | Self::InvalidAnswer(_) | Self::Internal(_) => ErrorKind::Stream,
        }
    }

    /// Whether the provider rejected the request as too large for its context.
    pub fn is_context_too_large(&self) -> bool {
        matches!(self, Self::Gateway(GatewayError::Provider(p)) if p.is_context_too_large())
    }
}

/// Result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
