//! Per-caller adapter construction.
//!
//! Credentials arrive with every request in [`ConnectionParams`], so adapters
//! are built on demand instead of being held for the process lifetime.

use std::sync::Arc;
use std::time::Duration;

use parley_core::{ConnectionParams, Model};
use parley_llm::ProviderAdapter;
use parley_llm_bedrock::{BedrockAdapter, BedrockConfig};
use parley_llm_openai::{CustomRestAdapter, OpenAiAdapter, OpenAiConfig, YandexAdapter, YandexConfig};
use parley_settings::ProviderSettings;
use tracing::debug;

use crate::errors::{GatewayError, GatewayResult};
use crate::kind::ProviderKind;

/// Builds a provider adapter for one caller.
pub trait AdapterFactory: Send + Sync {
    /// Adapter for `kind`. `model` is set for model-bound operations and
    /// absent for provider-wide ones (catalog, costs, info).
    fn create(
        &self,
        kind: &ProviderKind,
        model: Option<&Model>,
        connection: &ConnectionParams,
    ) -> GatewayResult<Arc<dyn ProviderAdapter>>;
}

/// Factory for the adapters compiled into this build.
#[derive(Clone, Debug)]
pub struct DefaultAdapterFactory {
    base: OpenAiConfig,
    yandex: YandexConfig,
    bedrock: BedrockConfig,
}

impl DefaultAdapterFactory {
    /// Factory using the timeouts and retry policy from `settings`.
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            base: OpenAiConfig {
                base_url: settings.openai_base_url.trim_end_matches('/').to_owned(),
                connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
                idle_timeout: Duration::from_millis(settings.stream_idle_timeout_ms),
                rate_limit: settings.rate_limit,
                max_tool_rounds: settings.max_tool_rounds,
                ..OpenAiConfig::default()
            },
            yandex: YandexConfig {
                openai_url: settings.yandex_openai_url.trim_end_matches('/').to_owned(),
                fm_url: settings.yandex_fm_url.trim_end_matches('/').to_owned(),
                ..YandexConfig::default()
            },
            bedrock: BedrockConfig {
                region: settings.bedrock_region.clone(),
                max_attempts: settings.rate_limit.max_retries + 1,
                max_tool_rounds: settings.max_tool_rounds,
                ..BedrockConfig::default()
            },
        }
    }

    fn openai_config(&self, connection: &ConnectionParams) -> OpenAiConfig {
        let mut config = self.base.clone();
        if let Some(url) = connection.openai_base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            config.base_url = url.trim_end_matches('/').to_owned();
        }
        config.api_key.clone_from(&connection.openai_api_key);
        config.admin_key.clone_from(&connection.openai_admin_key);
        config
    }

    fn yandex_config(&self, connection: &ConnectionParams) -> YandexConfig {
        YandexConfig {
            api_key: connection.yandex_api_key.clone(),
            folder_id: connection.yandex_folder.clone(),
            ..self.yandex.clone()
        }
    }

    fn bedrock_config(&self, connection: &ConnectionParams) -> BedrockConfig {
        let mut config = self.bedrock.clone();
        if let Some(region) = connection.aws_region.as_deref().filter(|r| !r.trim().is_empty()) {
            region.trim().clone_into(&mut config.region);
        }
        config.access_key_id.clone_from(&connection.aws_access_key_id);
        config.secret_access_key.clone_from(&connection.aws_secret_access_key);
        config
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(
        &self,
        kind: &ProviderKind,
        model: Option<&Model>,
        connection: &ConnectionParams,
    ) -> GatewayResult<Arc<dyn ProviderAdapter>> {
        debug!(provider = %kind, model = model.map(|m| m.model_id.as_str()), "creating adapter");
        match kind {
            ProviderKind::OpenAi => Ok(Arc::new(OpenAiAdapter::new(self.openai_config(connection))?)),
            ProviderKind::CustomRestApi => match model {
                Some(model) => Ok(Arc::new(CustomRestAdapter::new(model, &self.base)?)),
                None => Ok(Arc::new(CustomRestAdapter::unbound())),
            },
            ProviderKind::YandexFm => Ok(Arc::new(YandexAdapter::new(self.yandex_config(connection), &self.base)?)),
            ProviderKind::AwsBedrock => Ok(Arc::new(BedrockAdapter::new(self.bedrock_config(connection)))),
            ProviderKind::Unsupported(_) => Err(GatewayError::UnsupportedProvider { id: kind.id().to_owned() }),
        }
    }
}
