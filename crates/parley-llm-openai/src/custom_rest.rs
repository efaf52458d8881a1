//! Custom REST endpoint adapter.
//!
//! A model's custom settings name an OpenAI-compatible endpoint, its key and
//! which of the two protocols it speaks. Costs and catalogs are not
//! available for such endpoints.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::messages::ModelMessage;
use parley_core::{CustomProtocol, Model, ModelResponse};
use parley_llm::{
    CompletionRequest, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter, ProviderError, ProviderEventStream,
    ProviderInfo, ProviderResult, UsageCostInfo,
};
use tracing::debug;

use crate::client::OpenAiClient;
use crate::protocol::OpenAiProtocol;
use crate::types::{ApiFlavor, OpenAiConfig};

/// Provider ID.
pub const PROVIDER_ID: &str = "CUSTOM_REST_API";

const SETTINGS_REQUIRED: &str = "Custom model settings are required for CUSTOM_REST_API provider";

/// Adapter bound to one model's endpoint.
///
/// An [`unbound`](CustomRestAdapter::unbound) adapter answers the
/// provider-wide calls (catalog, costs, info) and rejects inference.
#[derive(Clone, Debug)]
pub struct CustomRestAdapter {
    protocol: Option<OpenAiProtocol>,
    flavor: ApiFlavor,
}

impl CustomRestAdapter {
    /// Build from the model's custom settings.
    ///
    /// Timeouts and retry policy come from `base`; the endpoint and key
    /// always come from the model.
    pub fn new(model: &Model, base: &OpenAiConfig) -> ProviderResult<Self> {
        let settings = model
            .custom_settings
            .as_ref()
            .filter(|s| s.protocol.is_some())
            .ok_or_else(|| ProviderError::other(SETTINGS_REQUIRED))?;
        let endpoint = settings
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProviderError::other("Endpoint URL is required for custom REST API provider"))?;
        let api_key = settings.api_key.clone().ok_or_else(|| ProviderError::Auth {
            message: "API key is required in custom settings".into(),
        })?;
        let flavor = match settings.protocol.unwrap_or_default() {
            CustomProtocol::OpenaiResponses => ApiFlavor::Responses,
            CustomProtocol::OpenaiChatCompletions => ApiFlavor::Completions,
        };
        debug!(provider = PROVIDER_ID, model = %model.model_id, ?flavor, "custom endpoint configured");

        let config = OpenAiConfig {
            connect_timeout: base.connect_timeout,
            idle_timeout: base.idle_timeout,
            rate_limit: base.rate_limit,
            max_tool_rounds: base.max_tool_rounds,
            ..OpenAiConfig::new(endpoint, api_key)
        };
        let protocol = OpenAiProtocol::new(OpenAiClient::new(config)?, PROVIDER_ID)
            .with_flavor(flavor)
            .with_model_override(settings.model_name.clone());
        Ok(Self {
            protocol: Some(protocol),
            flavor,
        })
    }

    /// Adapter with no model attached.
    pub fn unbound() -> Self {
        Self {
            protocol: None,
            flavor: ApiFlavor::Completions,
        }
    }

    fn protocol(&self) -> ProviderResult<&OpenAiProtocol> {
        self.protocol.as_ref().ok_or_else(|| ProviderError::other(SETTINGS_REQUIRED))
    }
}

#[async_trait]
impl ProviderAdapter for CustomRestAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse> {
        self.protocol()?.complete_chat(request, history).await
    }

    fn stream_chat(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream {
        match self.protocol() {
            Ok(protocol) => protocol.stream_chat(request, history),
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        }
    }

    async fn embeddings(&self, request: &EmbeddingsRequest) -> ProviderResult<EmbeddingsResponse> {
        self.protocol()?.embeddings(request).await
    }

    async fn models(&self) -> ProviderResult<HashMap<String, Model>> {
        Ok(HashMap::new())
    }

    async fn costs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<UsageCostInfo> {
        Ok(UsageCostInfo {
            start: Some(start),
            end: Some(end),
            ..UsageCostInfo::unavailable("Cost information is not available for custom REST API providers")
        })
    }

    async fn stop_request(&self, request_id: &str) -> ProviderResult<()> {
        self.protocol()?.stop_request(request_id).await
    }

    fn supports_cancellation(&self) -> bool {
        self.protocol.is_some() && self.flavor == ApiFlavor::Responses
    }

    async fn info(&self, _test_connection: bool) -> ProviderResult<ProviderInfo> {
        Ok(ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "Custom REST API".into(),
            is_connected: true,
            costs_info_available: false,
            details: serde_json::Map::new(),
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
    use parley_core::messages::MessageRole;
    use parley_core::{CustomModelSettings, ProviderEvent};
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn model(settings: Option<CustomModelSettings>) -> Model {
        Model {
            custom_settings: settings,
            ..Model::chat("my-model", "My Model", PROVIDER_ID)
        }
    }

    fn settings(endpoint: &str, protocol: CustomProtocol) -> CustomModelSettings {
        CustomModelSettings {
            endpoint: Some(endpoint.into()),
            api_key: Some(SecretString::from("custom-key")),
            model_name: Some("llama-3-70b".into()),
            protocol: Some(protocol),
        }
    }

    #[test]
    fn required_settings() {
        let base = OpenAiConfig::default();
        let err = CustomRestAdapter::new(&model(None), &base).unwrap_err();
        assert_eq!(err.to_string(), "Custom model settings are required for CUSTOM_REST_API provider");

        let no_protocol = CustomModelSettings {
            protocol: None,
            ..settings("http://h", CustomProtocol::OpenaiChatCompletions)
        };
        assert!(CustomRestAdapter::new(&model(Some(no_protocol)), &base).is_err());

        let no_endpoint = CustomModelSettings {
            endpoint: Some("  ".into()),
            ..settings("http://h", CustomProtocol::OpenaiChatCompletions)
        };
        let err = CustomRestAdapter::new(&model(Some(no_endpoint)), &base).unwrap_err();
        assert_eq!(err.to_string(), "Endpoint URL is required for custom REST API provider");

        let no_key = CustomModelSettings {
            api_key: None,
            ..settings("http://h", CustomProtocol::OpenaiChatCompletions)
        };
        assert_matches!(
            CustomRestAdapter::new(&model(Some(no_key)), &base),
            Err(ProviderError::Auth { .. })
        );
    }

    #[tokio::test]
    async fn streams_with_model_name_and_custom_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer custom-key"))
            .and(body_partial_json(json!({"model": "llama-3-70b"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hey\"}}]}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let adapter = CustomRestAdapter::new(
            &model(Some(settings(&server.uri(), CustomProtocol::OpenaiChatCompletions))),
            &OpenAiConfig::default(),
        )
        .unwrap();
        assert!(!adapter.supports_cancellation());

        let history = vec![ModelMessage::new(MessageRole::User, "hi")];
        let events: Vec<_> = adapter
            .stream_chat(CompletionRequest::new("my-model"), history)
            .collect()
            .await;
        assert_matches!(events.last(), Some(Ok(ProviderEvent::Complete(r))) if r.content == "hey");
    }

    #[tokio::test]
    async fn responses_protocol_can_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses/resp_1/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "resp_1"})))
            .expect(1)
            .mount(&server)
            .await;
        let adapter = CustomRestAdapter::new(
            &model(Some(settings(&server.uri(), CustomProtocol::OpenaiResponses))),
            &OpenAiConfig::default(),
        )
        .unwrap();
        assert!(adapter.supports_cancellation());
        adapter.stop_request("resp_1").await.unwrap();
    }

    #[tokio::test]
    async fn unbound_rejects_inference() {
        let adapter = CustomRestAdapter::unbound();
        assert!(!adapter.supports_cancellation());
        let err = adapter
            .complete_chat(&CompletionRequest::new("m"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), SETTINGS_REQUIRED);
        let events: Vec<_> = adapter.stream_chat(CompletionRequest::new("m"), Vec::new()).collect().await;
        assert_matches!(events.as_slice(), [Err(ProviderError::Other { .. })]);
        assert_eq!(adapter.info(false).await.unwrap().name, "Custom REST API");
    }

    #[tokio::test]
    async fn costs_and_catalog_unavailable() {
        let adapter = CustomRestAdapter::new(
            &model(Some(settings("http://localhost:1", CustomProtocol::OpenaiChatCompletions))),
            &OpenAiConfig::default(),
        )
        .unwrap();
        let costs = adapter.costs(Utc::now(), Utc::now()).await.unwrap();
        assert_eq!(
            costs.error.as_deref(),
            Some("Cost information is not available for custom REST API providers")
        );
        assert!(adapter.models().await.unwrap().is_empty());
        let info = adapter.info(true).await.unwrap();
        assert!(info.is_connected);
        assert!(info.details.is_empty());
    }
}
