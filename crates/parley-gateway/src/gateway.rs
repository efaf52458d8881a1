//! Request routing to provider adapters.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parley_core::{ConnectionParams, Model, ModelMessage, ModelResponse};
use parley_llm::{
    CompletionRequest, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter, ProviderError, ProviderEventStream,
    ProviderInfo, UsageCostInfo,
};
use parley_settings::{AiSettings, ParleySettings, ProviderSettings};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::collapse::collapse_history;
use crate::errors::{GatewayError, GatewayResult};
use crate::factory::{AdapterFactory, DefaultAdapterFactory};
use crate::kind::ProviderKind;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default output token limit.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
/// Default nucleus sampling.
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Generation parameters applied when a request leaves them unset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationDefaults {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token limit.
    pub max_tokens: u32,
    /// Nucleus sampling.
    pub top_p: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
        }
    }
}

impl From<&AiSettings> for GenerationDefaults {
    fn from(ai: &AiSettings) -> Self {
        Self {
            temperature: ai.default_temperature,
            max_tokens: ai.default_max_tokens,
            top_p: ai.default_top_p,
        }
    }
}

/// Single entry point to every provider.
#[derive(Clone)]
pub struct Gateway {
    providers: ProviderSettings,
    defaults: GenerationDefaults,
    factory: Arc<dyn AdapterFactory>,
}

impl Gateway {
    /// Gateway over the adapters compiled into this build.
    pub fn new(settings: &ParleySettings) -> Self {
        Self::with_factory(
            settings.providers.clone(),
            GenerationDefaults::from(&settings.ai),
            Arc::new(DefaultAdapterFactory::new(&settings.providers)),
        )
    }

    /// Gateway with a custom adapter factory.
    pub fn with_factory(
        providers: ProviderSettings,
        defaults: GenerationDefaults,
        factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self {
            providers,
            defaults,
            factory,
        }
    }

    /// Request defaults.
    pub fn defaults(&self) -> GenerationDefaults {
        self.defaults
    }

    /// Whether a provider is on the allow-list.
    ///
    /// The `*` wildcard covers known providers only; an unknown ID must be
    /// listed literally.
    pub fn is_enabled(&self, kind: &ProviderKind) -> bool {
        match kind {
            ProviderKind::Unsupported(id) => self.providers.enabled.iter().any(|p| p == id),
            known => self.providers.is_enabled(known.id()),
        }
    }

    /// Enabled providers in catalog order, then any literal unknown IDs.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = ProviderKind::known()
            .into_iter()
            .filter(|k| self.is_enabled(k))
            .collect();
        for id in &self.providers.enabled {
            let kind = ProviderKind::parse(id);
            if matches!(kind, ProviderKind::Unsupported(_)) && id != "*" && !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    fn adapter(
        &self,
        kind: &ProviderKind,
        model: Option<&Model>,
        connection: &ConnectionParams,
    ) -> GatewayResult<Arc<dyn ProviderAdapter>> {
        if !self.is_enabled(kind) {
            return Err(GatewayError::ProviderDisabled { id: kind.id().to_owned() });
        }
        self.factory.create(kind, model, connection)
    }

    fn adapter_for(&self, model: &Model, connection: &ConnectionParams) -> GatewayResult<Arc<dyn ProviderAdapter>> {
        self.adapter(&ProviderKind::parse(&model.api_provider), Some(model), connection)
    }

    fn prepare(&self, model: &Model, mut request: CompletionRequest) -> CompletionRequest {
        if request.model_id.is_empty() {
            request.model_id.clone_from(&model.model_id);
        }
        request.temperature = request.temperature.or(Some(self.defaults.temperature));
        request.max_tokens = request.max_tokens.or(Some(self.defaults.max_tokens));
        request.top_p = request.top_p.or(Some(self.defaults.top_p));
        request
    }

    /// Run a request to completion.
    #[instrument(skip_all, fields(provider = %model.api_provider, model = %model.model_id))]
    pub async fn complete_chat(
        &self,
        model: &Model,
        connection: &ConnectionParams,
        request: CompletionRequest,
        history: Vec<ModelMessage>,
    ) -> GatewayResult<ModelResponse> {
        let adapter = self.adapter_for(model, connection)?;
        let request = self.prepare(model, request);
        let history = collapse_history(history);
        debug!(turns = history.len(), "completing chat");
        Ok(adapter.complete_chat(&request, &history).await?)
    }

    /// Start a streaming request.
    ///
    /// Configuration failures surface here. Everything after the first
    /// poll arrives through the stream.
    #[instrument(skip_all, fields(provider = %model.api_provider, model = %model.model_id))]
    pub fn stream_chat(
        &self,
        model: &Model,
        connection: &ConnectionParams,
        request: CompletionRequest,
        history: Vec<ModelMessage>,
    ) -> GatewayResult<ProviderEventStream> {
        let adapter = self.adapter_for(model, connection)?;
        let request = self.prepare(model, request);
        let history = collapse_history(history);
        debug!(turns = history.len(), tools = request.tool_definitions().len(), "streaming chat");
        Ok(adapter.stream_chat(request, history))
    }

    /// Embedding vector from the model's provider.
    #[instrument(skip_all, fields(provider = %model.api_provider, model = %model.model_id))]
    pub async fn embeddings(
        &self,
        model: &Model,
        connection: &ConnectionParams,
        request: &EmbeddingsRequest,
    ) -> GatewayResult<EmbeddingsResponse> {
        let adapter = self.adapter_for(model, connection)?;
        Ok(adapter.embeddings(request).await?)
    }

    /// Cancel an in-flight backend request.
    #[instrument(skip_all, fields(provider = %model.api_provider, request_id = %request_id))]
    pub async fn stop_request(&self, model: &Model, connection: &ConnectionParams, request_id: &str) -> GatewayResult<()> {
        let adapter = self.adapter_for(model, connection)?;
        match adapter.stop_request(request_id).await {
            Ok(()) => {
                info!(request_id, "backend request cancelled");
                Ok(())
            }
            Err(ProviderError::Unsupported { .. }) => Err(GatewayError::CancellationUnsupported {
                id: model.api_provider.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Catalogs of every enabled provider, merged by model ID.
    ///
    /// Providers without an adapter in this build are skipped.
    #[instrument(skip_all)]
    pub async fn models(&self, connection: &ConnectionParams) -> GatewayResult<HashMap<String, Model>> {
        let mut adapters = Vec::new();
        for kind in self.enabled_providers() {
            match self.adapter(&kind, None, connection) {
                Ok(adapter) => adapters.push(adapter),
                Err(e @ GatewayError::UnsupportedProvider { .. }) => warn!(provider = %kind, error = %e, "skipping provider"),
                Err(e) => return Err(e),
            }
        }
        let catalogs = join_all(adapters.iter().map(|a| a.models())).await;
        let mut merged = HashMap::new();
        for catalog in catalogs {
            merged.extend(catalog?);
        }
        debug!(count = merged.len(), "models merged");
        Ok(merged)
    }

    /// Status of every enabled provider.
    ///
    /// A provider that fails reports `isConnected: false` with
    /// `details.error` instead of failing the whole list.
    #[instrument(skip_all, fields(test_connection = test_connection))]
    pub async fn provider_info(&self, connection: &ConnectionParams, test_connection: bool) -> Vec<ProviderInfo> {
        let kinds = self.enabled_providers();
        let infos = join_all(kinds.iter().map(|kind| async move {
            let adapter = self.adapter(kind, None, connection)?;
            Ok::<_, GatewayError>(adapter.info(test_connection).await?)
        }))
        .await;

        kinds
            .into_iter()
            .zip(infos)
            .map(|(kind, result)| match result {
                Ok(info) => info,
                Err(e) => {
                    error!(provider = %kind, error = %e, "failed to get provider info");
                    let mut details = Map::new();
                    let _ = details.insert("error".into(), Value::from("Failed to get provider info"));
                    ProviderInfo {
                        id: kind.id().to_owned(),
                        name: kind.display_name().to_owned(),
                        is_connected: false,
                        costs_info_available: false,
                        details,
                    }
                }
            })
            .collect()
    }

    /// Cost breakdown from one provider.
    #[instrument(skip_all, fields(provider = provider_id))]
    pub async fn costs(
        &self,
        provider_id: &str,
        connection: &ConnectionParams,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> GatewayResult<UsageCostInfo> {
        let adapter = self.adapter(&ProviderKind::parse(provider_id), None, connection)?;
        Ok(adapter.costs(start, end).await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
