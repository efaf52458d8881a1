//! Gateway errors.

use parley_core::ErrorKind;
use parley_llm::ProviderError;

/// Errors from routing a request to a provider.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider is known but not on the allow-list.
    #[error("API provider {id} is not enabled")]
    ProviderDisabled {
        /// Provider ID.
        id: String,
    },

    /// No adapter exists for the provider in this build.
    #[error("Unsupported API provider: {id}")]
    UnsupportedProvider {
        /// Provider ID.
        id: String,
    },

    /// The owning adapter cannot cancel requests.
    #[error("Provider {id} does not support request cancellation")]
    CancellationUnsupported {
        /// Provider ID.
        id: String,
    },

    /// The adapter failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GatewayError {
    /// Cross-crate error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderDisabled { .. } | Self::UnsupportedProvider { .. } | Self::CancellationUnsupported { .. } => {
                ErrorKind::Configuration
            }
            Self::Provider(e) => e.kind(),
        }
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
