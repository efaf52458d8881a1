//! Fan-out errors.

use parley_core::ErrorKind;

/// Errors from the shared substrate.
#[derive(Debug, thiserror::Error)]
pub enum FanOutError {
    /// The substrate is not connected.
    #[error("substrate unavailable")]
    Unavailable,

    /// A substrate command failed.
    #[error("substrate error: {message}")]
    Substrate {
        /// Error description.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("invalid fan-out payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl FanOutError {
    /// Shorthand for [`FanOutError::Substrate`].
    pub fn substrate(message: impl Into<String>) -> Self {
        Self::Substrate {
            message: message.into(),
        }
    }

    /// Cross-crate error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable | Self::Substrate { .. } | Self::Json(_) => ErrorKind::Persistence,
        }
    }
}

/// Result alias for fan-out operations.
pub type FanOutResult<T> = Result<T, FanOutError>;
