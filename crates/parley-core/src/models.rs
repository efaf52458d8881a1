//! Model catalog entries resolved by the orchestrator.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// What a model produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Text chat.
    #[default]
    Chat,
    /// Embedding vectors.
    Embedding,
    /// Images.
    ImageGeneration,
}

/// Optional capability flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFeature {
    /// The backend can cancel an in-flight request by ID.
    RequestCancellation,
    /// The model supports extended reasoning settings.
    Reasoning,
}

/// Wire protocol spoken by a custom REST endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomProtocol {
    /// OpenAI Responses API (background jobs, cancellable).
    OpenaiResponses,
    /// OpenAI chat completions.
    #[default]
    OpenaiChatCompletions,
}

/// Settings of a model served by a custom REST endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomModelSettings {
    /// Base URL of the endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API key for the endpoint.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Model name sent on the wire, when it differs from the catalog ID.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Wire protocol.
    #[serde(default)]
    pub protocol: Option<CustomProtocol>,
}

/// A model available to a user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Catalog ID sent to the backend.
    pub model_id: String,
    /// Display name.
    pub name: String,
    /// Provider ID string, e.g. `OPEN_AI`.
    pub api_provider: String,
    /// Output kind.
    #[serde(default)]
    pub model_type: ModelType,
    /// Whether responses are streamed token by token.
    #[serde(default)]
    pub streaming: bool,
    /// Capability flags.
    #[serde(default)]
    pub features: Vec<ModelFeature>,
    /// Settings for custom REST models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<CustomModelSettings>,
}

impl Model {
    /// A streaming chat model.
    pub fn chat(model_id: impl Into<String>, name: impl Into<String>, api_provider: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            name: name.into(),
            api_provider: api_provider.into(),
            model_type: ModelType::Chat,
            streaming: true,
            features: Vec::new(),
            custom_settings: None,
        }
    }

    /// Whether the model has a capability flag.
    pub fn has_feature(&self, feature: ModelFeature) -> bool {
        self.features.contains(&feature)
    }
}
