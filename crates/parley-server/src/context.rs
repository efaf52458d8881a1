//! Caller credentials from request headers.
//!
//! Authentication happens upstream; the proxy in front of the server
//! forwards each caller's backend credentials as headers:
//!
//! | Header | Field |
//! |---|---|
//! | `x-openai-api-key` | `openai_api_key` |
//! | `x-openai-admin-key` | `openai_admin_key` |
//! | `x-openai-base-url` | `openai_base_url` |
//! | `x-yandex-api-key` | `yandex_api_key` |
//! | `x-yandex-folder` | `yandex_folder` |
//! | `x-aws-region` | `aws_region` |
//! | `x-aws-access-key-id` | `aws_access_key_id` |
//! | `x-aws-secret-access-key` | `aws_secret_access_key` |
//! | `x-search-api-key` | `search_api_key` |
//! | `x-search-folder` | `search_folder` |
//! | `x-mcp-token-{server_id}` | `mcp_tokens[server_id]` |
//! | `x-default-model-id` | the caller's default model |

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use parley_core::ConnectionParams;
use parley_runtime::RequestContext;
use secrecy::SecretString;

const MCP_TOKEN_PREFIX: &str = "x-mcp-token-";

/// Request context of the calling user.
#[derive(Clone, Debug, Default)]
pub struct Caller(pub RequestContext);

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn secret(headers: &HeaderMap, name: &str) -> Option<SecretString> {
    header(headers, name).map(SecretString::from)
}

/// Build the context from forwarded headers. Missing or non-UTF-8 values
/// are treated as absent.
pub fn caller_context(headers: &HeaderMap) -> RequestContext {
    let mcp_tokens = headers
        .iter()
        .filter_map(|(name, value)| {
            let server_id = name.as_str().strip_prefix(MCP_TOKEN_PREFIX)?;
            let token = value.to_str().ok()?.trim();
            (!server_id.is_empty() && !token.is_empty()).then(|| (server_id.to_owned(), SecretString::from(token)))
        })
        .collect();

    RequestContext {
        connection: ConnectionParams {
            openai_api_key: secret(headers, "x-openai-api-key"),
            openai_admin_key: secret(headers, "x-openai-admin-key"),
            openai_base_url: header(headers, "x-openai-base-url"),
            yandex_api_key: secret(headers, "x-yandex-api-key"),
            yandex_folder: header(headers, "x-yandex-folder"),
            aws_region: header(headers, "x-aws-region"),
            aws_access_key_id: header(headers, "x-aws-access-key-id"),
            aws_secret_access_key: secret(headers, "x-aws-secret-access-key"),
            search_api_key: secret(headers, "x-search-api-key"),
            search_folder: header(headers, "x-search-folder"),
            mcp_tokens,
        },
        default_model_id: header(headers, "x-default-model-id"),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(caller_context(&parts.headers)))
    }
}
