//! Protocol selection and the shared request pipeline.
//!
//! Both the OpenAI adapter and custom REST endpoints speak one of two
//! flavors. [`OpenAiProtocol`] picks the flavor, builds a [`Turn`] and runs
//! it through rate-limit retry and the stream contract.

use std::sync::Arc;

use parley_core::ModelResponse;
use parley_core::messages::{ModelMessage, Usage};
use parley_llm::retry::{StreamFactory, retry_rate_limited, with_rate_limit_retry};
use parley_llm::stream_pipeline::enforce_contract;
use parley_llm::{
    CompletionRequest, EmbeddingsRequest, EmbeddingsResponse, ProviderError, ProviderEventStream, ProviderResult,
};
use tracing::{debug, instrument};

use crate::client::OpenAiClient;
use crate::types::{ApiFlavor, EMBEDDINGS_DIMENSIONS, EmbeddingsBody, EmbeddingsReply};
use crate::{completions, responses};

/// Model ID prefixes served through the Responses API.
const RESPONSES_PREFIXES: &[&str] = &["gpt-5", "o3", "o4", "gpt-4.1", "computer-use"];

/// Flavor the OpenAI API uses for a model.
pub fn flavor_for(model_id: &str) -> ApiFlavor {
    if RESPONSES_PREFIXES.iter().any(|p| model_id.starts_with(p)) {
        ApiFlavor::Responses
    } else {
        ApiFlavor::Completions
    }
}

/// Everything one chat turn needs, owned so it can move into a stream.
#[derive(Clone, Debug)]
pub(crate) struct Turn {
    pub client: Arc<OpenAiClient>,
    pub provider: &'static str,
    /// Model name sent on the wire.
    pub model: String,
    pub request: CompletionRequest,
    pub history: Vec<ModelMessage>,
}

/// Flavor dispatch over one client.
#[derive(Clone, Debug)]
pub struct OpenAiProtocol {
    client: Arc<OpenAiClient>,
    provider: &'static str,
    flavor: Option<ApiFlavor>,
    model_override: Option<String>,
}

impl OpenAiProtocol {
    /// Protocol choosing the flavor per model.
    pub fn new(client: OpenAiClient, provider: &'static str) -> Self {
        Self {
            client: Arc::new(client),
            provider,
            flavor: None,
            model_override: None,
        }
    }

    /// Always use `flavor`.
    #[must_use]
    pub fn with_flavor(mut self, flavor: ApiFlavor) -> Self {
        self.flavor = Some(flavor);
        self
    }

    /// Send `model` on the wire instead of the request's model ID.
    #[must_use]
    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.model_override = model.filter(|m| !m.trim().is_empty());
        self
    }

    /// Underlying client.
    pub fn client(&self) -> &OpenAiClient {
        &self.client
    }

    /// Flavor used for `model_id`.
    pub fn flavor(&self, model_id: &str) -> ApiFlavor {
        self.flavor.unwrap_or_else(|| flavor_for(model_id))
    }

    fn turn(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> Turn {
        Turn {
            client: Arc::clone(&self.client),
            provider: self.provider,
            model: self.model_override.clone().unwrap_or_else(|| request.model_id.clone()),
            request,
            history,
        }
    }

    /// Stream a turn with retry and contract enforcement.
    pub fn stream_chat(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream {
        let flavor = self.flavor(&request.model_id);
        debug!(provider = self.provider, model = %request.model_id, ?flavor, "streaming chat");
        let turn = self.turn(request, history);
        let factory: StreamFactory = Box::new(move || {
            let turn = turn.clone();
            Box::pin(async move {
                Ok(match flavor {
                    ApiFlavor::Completions => completions::stream(turn),
                    ApiFlavor::Responses => responses::stream(turn),
                })
            })
        });
        let policy = self.client.config().rate_limit;
        enforce_contract(self.provider, with_rate_limit_retry(self.provider, factory, policy))
    }

    /// Run a turn to completion without streaming.
    #[instrument(skip_all, fields(provider = self.provider, model = %request.model_id))]
    pub async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse> {
        let turn = self.turn(request.clone(), history.to_vec());
        match self.flavor(&request.model_id) {
            ApiFlavor::Completions => completions::complete(&turn).await,
            ApiFlavor::Responses => responses::complete(&turn).await,
        }
    }

    /// Embed one input as a float vector.
    pub async fn embeddings(&self, request: &EmbeddingsRequest) -> ProviderResult<EmbeddingsResponse> {
        let model = self.model_override.as_deref().unwrap_or(&request.model_id);
        let dimensions = request
            .dimensions
            .or_else(|| (model == "text-embedding-3-large").then_some(EMBEDDINGS_DIMENSIONS));
        let body = EmbeddingsBody {
            model,
            input: &request.input,
            encoding_format: "float",
            dimensions,
        };
        let policy = &self.client.config().rate_limit;
        let reply: EmbeddingsReply =
            retry_rate_limited(self.provider, policy, || self.client.post_json("embeddings", &body)).await?;
        let embedding = reply
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::other("Embeddings response contained no data"))?;
        Ok(EmbeddingsResponse {
            embedding,
            usage: reply.usage.map(Usage::from),
        })
    }

    /// Whether requests for `model_id` can be cancelled.
    pub fn supports_cancellation(&self, model_id: &str) -> bool {
        self.flavor(model_id) == ApiFlavor::Responses
    }

    /// Cancel a background Responses job.
    pub async fn stop_request(&self, request_id: &str) -> ProviderResult<()> {
        if self.flavor == Some(ApiFlavor::Completions) {
            return Err(ProviderError::unsupported("stop_request"));
        }
        debug!(provider = self.provider, request_id, "cancelling background response");
        responses::cancel(&self.client, request_id).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
