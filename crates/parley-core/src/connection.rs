//! Per-request backend credentials.
//!
//! Supplied by the authentication layer for each caller and never persisted.
//! Secrets are wrapped in [`SecretString`] so they stay out of `Debug` output
//! and logs.

use std::collections::HashMap;

use secrecy::SecretString;
use serde::Deserialize;

/// Credentials and endpoints for one caller.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionParams {
    /// OpenAI API key.
    pub openai_api_key: Option<SecretString>,
    /// OpenAI admin key (usage and costs endpoints).
    pub openai_admin_key: Option<SecretString>,
    /// Override of the OpenAI base URL.
    pub openai_base_url: Option<String>,
    /// Yandex Foundation Models API key or IAM token.
    pub yandex_api_key: Option<SecretString>,
    /// Yandex Cloud folder the models run in.
    pub yandex_folder: Option<String>,
    /// AWS region for Bedrock.
    pub aws_region: Option<String>,
    /// AWS access key ID for Bedrock.
    pub aws_access_key_id: Option<String>,
    /// AWS secret access key for Bedrock.
    pub aws_secret_access_key: Option<SecretString>,
    /// Web search backend API key.
    pub search_api_key: Option<SecretString>,
    /// Web search backend folder / account.
    pub search_folder: Option<String>,
    /// Per-MCP-server bearer tokens keyed by server ID.
    pub mcp_tokens: HashMap<String, SecretString>,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("openai_base_url", &self.openai_base_url)
            .field("yandex_api_key", &self.yandex_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("yandex_folder", &self.yandex_folder)
            .field("aws_region", &self.aws_region)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &self.aws_secret_access_key.as_ref().map(|_| "[REDACTED]"))
            .field("search_folder", &self.search_folder)
            .field("mcp_tokens", &self.mcp_tokens.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
