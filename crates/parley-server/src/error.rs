//! Mapping of runtime failures onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parley_core::ErrorKind;
use parley_runtime::{RuntimeError, ValidationError};
use serde::Serialize;
use tracing::{error, warn};

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// User-facing message.
    pub error: String,
    /// Error category, as emitted on chat error events.
    pub category: &'static str,
}

/// A failed operation, rendered as `{"error", "category"}`.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub RuntimeError);

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RuntimeError::Validation(
                ValidationError::ChatNotFound | ValidationError::MessageNotFound | ValidationError::ModelNotFound,
            ) => StatusCode::NOT_FOUND,
            err => match err.kind() {
                ErrorKind::Validation | ErrorKind::Configuration => StatusCode::BAD_REQUEST,
                ErrorKind::ContextTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                ErrorKind::TransientProvider => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            category: self.0.category(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use parley_gateway::GatewayError;
    use parley_llm::ProviderError;

    use super::*;

    fn status_of(err: impl Into<RuntimeError>) -> StatusCode {
        ApiError(err.into()).status()
    }

    #[test]
    fn missing_entities_are_not_found() {
        assert_eq!(status_of(ValidationError::ChatNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ValidationError::MessageNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ValidationError::ModelNotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_requests_are_bad_requests() {
        assert_eq!(status_of(ValidationError::ChatIdRequired), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ValidationError::EditNonUserMessage), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(GatewayError::ProviderDisabled { id: "OPEN_AI".into() }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn provider_and_storage_failures() {
        assert_eq!(
            status_of(GatewayError::from(ProviderError::other("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(GatewayError::from(ProviderError::RateLimited {
                retry_after_ms: 0,
                message: "slow down".into(),
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_of(RuntimeError::Persistence("disk".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn body_carries_message_and_category() {
        let response = ApiError::from(ValidationError::SwitchUserMessage).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "User messages cannot be switched");
        assert_eq!(body["category"], "validation");
    }
}
