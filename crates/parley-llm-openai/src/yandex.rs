//! Yandex Foundation Models adapter.
//!
//! Chat goes through Yandex's OpenAI-compatible completions endpoint.
//! Catalog model IDs are URIs with a `{folder}` placeholder that is filled
//! with the caller's folder before each request. Embeddings use the native
//! `textEmbedding` endpoint, which authenticates with `Api-Key` (or
//! `Bearer` for IAM tokens) and the `x-folder-id` header.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::messages::{ModelMessage, Usage};
use parley_core::{Model, ModelResponse};
use parley_llm::error_parsing::error_from_response;
use parley_llm::{
    CompletionRequest, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter, ProviderError, ProviderEventStream,
    ProviderInfo, ProviderResult, UsageCostInfo,
};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::client::OpenAiClient;
use crate::protocol::OpenAiProtocol;
use crate::types::{ApiFlavor, OpenAiConfig};

/// Provider ID.
pub const PROVIDER_ID: &str = "YANDEX_FM";

/// OpenAI-compatible endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://llm.api.cloud.yandex.net/v1";

/// Native Foundation Models API root.
pub const DEFAULT_FM_URL: &str = "https://llm.api.cloud.yandex.net";

const KEY_MISSING: &str =
    "Yandex API key is not set. Set YANDEX_FM_API_KEY/YANDEX_FM_API_FOLDER in connection settings.";

/// Placeholder replaced by the folder ID in model URIs.
const FOLDER_PLACEHOLDER: &str = "{folder}";

/// Static chat catalog: URI template and display name.
const CATALOG: &[(&str, &str)] = &[
    ("gpt://{folder}/yandexgpt/latest", "YandexGPT Pro"),
    ("gpt://{folder}/yandexgpt-lite/latest", "YandexGPT Lite"),
    ("gpt://{folder}/qwen3-235b-a22b-fp8/latest", "Qwen3 235B"),
    ("gpt://{folder}/gemma-3-27b-it/latest", "Gemma3 27B"),
    ("gpt://{folder}/gpt-oss-120b/latest", "gpt-oss-120b"),
    ("gpt://{folder}/gpt-oss-20b/latest", "gpt-oss-20b"),
];

/// Caller credentials and endpoints.
#[derive(Clone, Debug)]
pub struct YandexConfig {
    /// API key, or an IAM token (`t1...`).
    pub api_key: Option<SecretString>,
    /// Cloud folder the models are billed to.
    pub folder_id: Option<String>,
    /// OpenAI-compatible endpoint.
    pub openai_url: String,
    /// Native API root.
    pub fm_url: String,
}

impl Default for YandexConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            folder_id: None,
            openai_url: DEFAULT_OPENAI_URL.to_owned(),
            fm_url: DEFAULT_FM_URL.to_owned(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextEmbeddingBody<'a> {
    model_uri: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextEmbeddingReply {
    embedding: Vec<f32>,
    #[serde(default)]
    num_tokens: Option<String>,
}

/// Yandex adapter for one caller.
#[derive(Clone, Debug)]
pub struct YandexAdapter {
    config: YandexConfig,
    protocol: Option<OpenAiProtocol>,
    http: reqwest::Client,
}

impl YandexAdapter {
    /// Build from the caller's credentials. Timeouts, retry policy and tool
    /// round limits come from `base`.
    pub fn new(config: YandexConfig, base: &OpenAiConfig) -> ProviderResult<Self> {
        let protocol = match &config.api_key {
            Some(key) => {
                let openai = OpenAiConfig {
                    connect_timeout: base.connect_timeout,
                    idle_timeout: base.idle_timeout,
                    rate_limit: base.rate_limit,
                    max_tool_rounds: base.max_tool_rounds,
                    ..OpenAiConfig::new(config.openai_url.clone(), key.clone())
                };
                Some(OpenAiProtocol::new(OpenAiClient::new(openai)?, PROVIDER_ID).with_flavor(ApiFlavor::Completions))
            }
            None => None,
        };
        let http = reqwest::Client::builder().connect_timeout(base.connect_timeout).build()?;
        Ok(Self { config, protocol, http })
    }

    fn folder(&self) -> Option<&str> {
        self.config.folder_id.as_deref().filter(|f| !f.is_empty())
    }

    /// Fill the folder placeholder of a model URI.
    pub fn model_uri(&self, model_id: &str) -> String {
        model_id.replace(FOLDER_PLACEHOLDER, self.folder().unwrap_or("default"))
    }

    /// Protocol for chat, requiring both key and folder.
    fn chat_protocol(&self) -> ProviderResult<&OpenAiProtocol> {
        match (&self.protocol, self.folder()) {
            (Some(protocol), Some(_)) => Ok(protocol),
            _ => Err(ProviderError::Auth {
                message: KEY_MISSING.into(),
            }),
        }
    }

    fn auth_header(key: &SecretString) -> ProviderResult<HeaderValue> {
        let key = key.expose_secret();
        let value = if key.starts_with("t1") {
            format!("Bearer {key}")
        } else {
            format!("Api-Key {key}")
        };
        HeaderValue::from_str(&value).map_err(|e| ProviderError::Auth {
            message: format!("Invalid authorization header: {e}"),
        })
    }
}

#[async_trait]
impl ProviderAdapter for YandexAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse> {
        let protocol = self.chat_protocol()?;
        let request = CompletionRequest {
            model_id: self.model_uri(&request.model_id),
            ..request.clone()
        };
        protocol.complete_chat(&request, history).await
    }

    fn stream_chat(&self, mut request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream {
        match self.chat_protocol() {
            Ok(protocol) => {
                request.model_id = self.model_uri(&request.model_id);
                protocol.stream_chat(request, history)
            }
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        }
    }

    #[instrument(skip_all, fields(provider = PROVIDER_ID, model = %request.model_id))]
    async fn embeddings(&self, request: &EmbeddingsRequest) -> ProviderResult<EmbeddingsResponse> {
        let (Some(key), Some(folder)) = (&self.config.api_key, self.folder()) else {
            return Err(ProviderError::Auth {
                message: "Yandex API key or Folder ID is not set.".into(),
            });
        };
        let model_uri = self.model_uri(&request.model_id);
        let url = format!("{}/foundationModels/v1/textEmbedding", self.config.fm_url.trim_end_matches('/'));
        debug!(url = %url, "requesting embedding");
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, Self::auth_header(key)?)
            .header("x-folder-id", folder)
            .json(&TextEmbeddingBody {
                model_uri: &model_uri,
                text: &request.input,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let reply: TextEmbeddingReply = response.json().await?;
        let input_tokens = reply.num_tokens.as_deref().and_then(|n| n.parse().ok()).unwrap_or(0);
        Ok(EmbeddingsResponse {
            embedding: reply.embedding,
            usage: Some(Usage {
                input_tokens,
                output_tokens: 0,
            }),
        })
    }

    async fn models(&self) -> ProviderResult<HashMap<String, Model>> {
        if self.config.api_key.is_none() {
            return Ok(HashMap::new());
        }
        Ok(CATALOG
            .iter()
            .map(|(uri, name)| ((*uri).to_owned(), Model::chat(*uri, *name, PROVIDER_ID)))
            .collect())
    }

    async fn costs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<UsageCostInfo> {
        Ok(UsageCostInfo {
            start: Some(start),
            end: Some(end),
            ..UsageCostInfo::unavailable("Cost information is not available from Yandex API")
        })
    }

    async fn stop_request(&self, _request_id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("stop_request"))
    }

    async fn info(&self, _test_connection: bool) -> ProviderResult<ProviderInfo> {
        let mut details = Map::new();
        let _ = details.insert("folderId".into(), Value::from(self.folder().unwrap_or("N/A")));
        Ok(ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "Yandex FM".into(),
            is_connected: self.config.api_key.is_some() && self.folder().is_some(),
            costs_info_available: false,
            details,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use parley_core::ProviderEvent;
    use parley_core::messages::MessageRole;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn adapter(server: &MockServer, key: Option<&str>, folder: Option<&str>) -> YandexAdapter {
        let config = YandexConfig {
            api_key: key.map(SecretString::from),
            folder_id: folder.map(str::to_owned),
            openai_url: format!("{}/v1", server.uri()),
            fm_url: server.uri(),
        };
        YandexAdapter::new(config, &OpenAiConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn streams_with_folder_filled_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer y-key"))
            .and(body_partial_json(json!({"model": "gpt://b1g/yandexgpt/latest"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"choices\":[{\"delta\":{\"content\":\"privet\"}}]}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server, Some("y-key"), Some("b1g"));
        assert!(!adapter.supports_cancellation());
        let history = vec![ModelMessage::new(MessageRole::User, "hi")];
        let events: Vec<_> = adapter
            .stream_chat(CompletionRequest::new("gpt://{folder}/yandexgpt/latest"), history)
            .collect()
            .await;
        assert_matches!(events.last(), Some(Ok(ProviderEvent::Complete(r))) if r.content == "privet");
    }

    #[tokio::test]
    async fn chat_needs_key_and_folder() {
        let server = MockServer::start().await;
        let no_folder = adapter(&server, Some("y-key"), None);
        let events: Vec<_> = no_folder
            .stream_chat(CompletionRequest::new("gpt://{folder}/yandexgpt/latest"), Vec::new())
            .collect()
            .await;
        assert_matches!(events.as_slice(), [Err(ProviderError::Auth { message })] if message == KEY_MISSING);

        let no_key = adapter(&server, None, Some("b1g"));
        let err = no_key
            .complete_chat(&CompletionRequest::new("gpt://{folder}/yandexgpt/latest"), &[])
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Auth { .. });
    }

    #[tokio::test]
    async fn embeddings_use_api_key_scheme_and_folder_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/foundationModels/v1/textEmbedding"))
            .and(header("authorization", "Api-Key y-key"))
            .and(header("x-folder-id", "b1g"))
            .and(body_partial_json(json!({"modelUri": "emb://b1g/text-search-doc/latest", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embedding": [0.25, -0.5],
                "numTokens": "3",
                "modelVersion": "1"
            })))
            .mount(&server)
            .await;

        let reply = adapter(&server, Some("y-key"), Some("b1g"))
            .embeddings(&EmbeddingsRequest {
                model_id: "emb://{folder}/text-search-doc/latest".into(),
                input: "hello".into(),
                dimensions: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.embedding, vec![0.25, -0.5]);
        assert_eq!(reply.usage.map(|u| u.input_tokens), Some(3));
    }

    #[tokio::test]
    async fn iam_tokens_are_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/foundationModels/v1/textEmbedding"))
            .and(header("authorization", "Bearer t1.iam-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [1.0]})))
            .expect(1)
            .mount(&server)
            .await;
        let reply = adapter(&server, Some("t1.iam-token"), Some("b1g"))
            .embeddings(&EmbeddingsRequest {
                model_id: "emb://{folder}/text-search-query/latest".into(),
                input: "q".into(),
                dimensions: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.usage.map(|u| u.input_tokens), Some(0));
    }

    #[tokio::test]
    async fn embedding_errors_are_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/foundationModels/v1/textEmbedding"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": {"message": "denied"}})))
            .mount(&server)
            .await;
        let err = adapter(&server, Some("y-key"), Some("b1g"))
            .embeddings(&EmbeddingsRequest {
                model_id: "emb://{folder}/text-search-doc/latest".into(),
                input: "x".into(),
                dimensions: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Api { status: 403, .. } | ProviderError::Auth { .. });
    }

    #[tokio::test]
    async fn catalog_costs_and_info() {
        let server = MockServer::start().await;
        let adapter = adapter(&server, Some("y-key"), None);
        let models = adapter.models().await.unwrap();
        assert_eq!(models.len(), 6);
        assert_eq!(models["gpt://{folder}/yandexgpt/latest"].name, "YandexGPT Pro");
        assert!(models.values().all(|m| m.streaming));

        let costs = adapter.costs(Utc::now(), Utc::now()).await.unwrap();
        assert_eq!(costs.error.as_deref(), Some("Cost information is not available from Yandex API"));

        let info = adapter.info(true).await.unwrap();
        assert!(!info.is_connected);
        assert_eq!(info.details["folderId"], json!("N/A"));

        assert_matches!(adapter.stop_request("r1").await, Err(ProviderError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn no_catalog_without_key() {
        let server = MockServer::start().await;
        assert!(adapter(&server, None, Some("b1g")).models().await.unwrap().is_empty());
    }
}
