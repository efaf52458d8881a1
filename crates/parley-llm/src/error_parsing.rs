//! API error response parsing shared by every HTTP adapter.
//!
//! Handles these error envelopes:
//! - Standard: `{"error": {"message": "...", "type": "...", "code": "..."}}`
//! - Detail:   `{"detail": "..."}`
//! - Flat:     `{"message": "...", "code": "..."}`

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::provider::ProviderError;

static CONTEXT_TOO_LARGE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)429\s+request too large|failed with status code 400").ok()
});

/// Whether an error text says the request payload was too large.
pub fn is_context_too_large_message(text: &str) -> bool {
    CONTEXT_TOO_LARGE.as_ref().is_some_and(|re| re.is_match(text))
}

/// Parsed API error information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiErrorInfo {
    /// Human-readable error message.
    pub message: String,
    /// Backend error code (e.g. `"rate_limit_exceeded"`).
    pub code: Option<String>,
    /// Whether the request can be retried (429 or 5xx).
    pub retryable: bool,
}

/// Parse an API error response body into structured error info.
///
/// Falls back to the raw body text when no envelope matches.
pub fn parse_api_error(body: &str, status: u16) -> ApiErrorInfo {
    let retryable = status == 429 || status >= 500;
    let fallback = || ApiErrorInfo {
        message: format!("HTTP {status}: {body}"),
        code: None,
        retryable,
    };

    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    if let Some(msg) = json["error"]["message"].as_str() {
        let code = json["error"]["code"]
            .as_str()
            .or_else(|| json["error"]["type"].as_str())
            .map(String::from);
        return ApiErrorInfo {
            message: msg.to_string(),
            code,
            retryable,
        };
    }

    if let Some(msg) = json["error"].as_str() {
        return ApiErrorInfo {
            message: msg.to_string(),
            code: None,
            retryable,
        };
    }

    if let Some(msg) = json["detail"].as_str().or_else(|| json["message"].as_str()) {
        let code = json["code"].as_str().or_else(|| json["type"].as_str()).map(String::from);
        return ApiErrorInfo {
            message: msg.to_string(),
            code,
            retryable,
        };
    }

    fallback()
}

/// Turn a non-success HTTP answer into a [`ProviderError`].
///
/// `retry_after` is the raw `Retry-After` header value in seconds, if any.
pub fn error_from_status(status: u16, body: &str, retry_after: Option<&str>) -> ProviderError {
    let info = parse_api_error(body, status);
    match status {
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(0, |secs| secs.saturating_mul(1000)),
            message: info.message,
        },
        401 | 403 => ProviderError::Auth {
            message: info.message,
        },
        _ => ProviderError::Api {
            status,
            message: info.message,
            code: info.code,
            retryable: info.retryable,
        },
    }
}

/// Read a failed response and convert it with [`error_from_status`].
pub async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await.unwrap_or_default();
    error_from_status(status, &body, retry_after.as_deref())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn openai_standard_format() {
        let body = r#"{"error":{"type":"invalid_request_error","code":"model_not_found","message":"No such model"}}"#;
        let info = parse_api_error(body, 404);
        assert_eq!(info.message, "No such model");
        assert_eq!(info.code.as_deref(), Some("model_not_found"));
        assert!(!info.retryable);
    }

    #[test]
    fn type_used_when_code_missing() {
        let body = r#"{"error":{"type":"server_error","message":"Internal error"}}"#;
        let info = parse_api_error(body, 500);
        assert_eq!(info.code.as_deref(), Some("server_error"));
        assert!(info.retryable);
    }

    #[test]
    fn string_error_format() {
        let info = parse_api_error(r#"{"error":"bad key"}"#, 401);
        assert_eq!(info.message, "bad key");
    }

    #[test]
    fn detail_format() {
        let info = parse_api_error(r#"{"detail":"Model not found"}"#, 404);
        assert_eq!(info.message, "Model not found");
        assert!(info.code.is_none());
    }

    #[test]
    fn non_json_body() {
        let info = parse_api_error("Bad Gateway", 502);
        assert_eq!(info.message, "HTTP 502: Bad Gateway");
        assert!(info.retryable);
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        let err = error_from_status(429, r#"{"error":{"message":"Request too large"}}"#, Some("2"));
        assert_matches!(err, ProviderError::RateLimited { retry_after_ms: 2000, .. });
        assert!(err.is_context_too_large());
    }

    #[test]
    fn auth_statuses() {
        assert_matches!(error_from_status(401, "", None), ProviderError::Auth { .. });
        assert_matches!(error_from_status(403, "", None), ProviderError::Auth { .. });
    }

    #[test]
    fn bad_request_is_context_too_large() {
        let err = error_from_status(400, r#"{"error":{"message":"too long"}}"#, None);
        assert_eq!(err.to_string(), "Request failed with status code 400: too long");
        assert!(err.is_context_too_large());
    }

    #[test]
    fn context_regex_is_case_insensitive() {
        assert!(is_context_too_large_message("Error: 429   REQUEST TOO LARGE for model"));
        assert!(is_context_too_large_message("Request Failed With Status Code 400"));
        assert!(!is_context_too_large_message("Request failed with status code 500"));
    }
}
