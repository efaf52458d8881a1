//! Configuration, constants and wire bodies for the Bedrock adapter.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Provider ID.
pub const PROVIDER_ID: &str = "AWS_BEDROCK";

/// Region used when the caller names none.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default tool round limit per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

/// Error when no credentials were supplied.
pub const NOT_INITIALIZED: &str =
    "AWS Bedrock client is not initialized. Please check your AWS credentials and region.";

/// Static chat catalog: model ID and display name.
pub const CHAT_MODELS: &[(&str, &str)] = &[
    ("anthropic.claude-3-5-sonnet-20240620-v1:0", "Claude 3.5 Sonnet"),
    ("anthropic.claude-3-haiku-20240307-v1:0", "Claude 3 Haiku"),
    ("amazon.nova-pro-v1:0", "Amazon Nova Pro"),
    ("amazon.nova-lite-v1:0", "Amazon Nova Lite"),
    ("meta.llama3-70b-instruct-v1:0", "Llama 3 70B Instruct"),
    ("mistral.mistral-large-2402-v1:0", "Mistral Large"),
];

/// Static embedding catalog.
pub const EMBEDDING_MODELS: &[(&str, &str)] = &[
    ("amazon.titan-embed-text-v2:0", "Titan Text Embeddings V2"),
    ("cohere.embed-multilingual-v3", "Cohere Embed Multilingual"),
];

/// Caller credentials and client tuning.
#[derive(Clone, Debug)]
pub struct BedrockConfig {
    /// AWS region of the Bedrock endpoint.
    pub region: String,
    /// Access key ID.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<SecretString>,
    /// Endpoint override, e.g. a VPC endpoint.
    pub endpoint_url: Option<String>,
    /// Total attempts per call, including the first (SDK standard retry mode).
    pub max_attempts: u32,
    /// Upper bound on tool-call rounds in one turn.
    pub max_tool_rounds: u32,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_owned(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            max_attempts: 10,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl BedrockConfig {
    /// Whether both halves of the key pair are present.
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.as_deref().is_some_and(|k| !k.is_empty()) && self.secret_access_key.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding bodies (InvokeModel)
// ─────────────────────────────────────────────────────────────────────────────

/// Titan text embeddings request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TitanEmbeddingBody<'a> {
    pub(crate) input_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) dimensions: Option<u32>,
}

/// Cohere embed request.
#[derive(Debug, Serialize)]
pub(crate) struct CohereEmbeddingBody<'a> {
    pub(crate) texts: [&'a str; 1],
    pub(crate) input_type: &'static str,
    pub(crate) truncate: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) dimensions: Option<u32>,
}

/// Either provider's embedding reply.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct EmbeddingReply {
    pub(crate) embedding: Option<Vec<f32>>,
    pub(crate) embeddings: Option<Vec<Vec<f32>>>,
    pub(crate) input_text_token_count: Option<u64>,
}

impl EmbeddingReply {
    /// The vector, whichever field carried it.
    pub(crate) fn into_vector(self) -> Vec<f32> {
        self.embedding
            .or_else(|| self.embeddings.and_then(|e| e.into_iter().next()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_need_both_halves() {
        let mut config = BedrockConfig::default();
        assert!(!config.has_credentials());
        config.access_key_id = Some("AKIA".into());
        assert!(!config.has_credentials());
        config.secret_access_key = Some(SecretString::from("secret"));
        assert!(config.has_credentials());
        config.access_key_id = Some(String::new());
        assert!(!config.has_credentials());
    }

    #[test]
    fn titan_body_omits_missing_dimensions() {
        let body = TitanEmbeddingBody {
            input_text: "hi",
            dimensions: None,
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), serde_json::json!({"inputText": "hi"}));
    }

    #[test]
    fn reply_vector_from_either_shape() {
        let titan: EmbeddingReply =
            serde_json::from_str(r#"{"embedding":[0.5],"inputTextTokenCount":2}"#).unwrap();
        assert_eq!(titan.input_text_token_count, Some(2));
        assert_eq!(titan.into_vector(), vec![0.5]);

        let cohere: EmbeddingReply = serde_json::from_str(r#"{"embeddings":[[1.0,2.0]],"id":"x"}"#).unwrap();
        assert_eq!(cohere.into_vector(), vec![1.0, 2.0]);
    }
}
