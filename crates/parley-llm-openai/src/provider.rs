//! OpenAI adapter.
//!
//! Routes each chat model to chat completions or Responses, builds the model
//! catalog from `GET /models` and reads organization costs with the admin key.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parley_core::messages::ModelMessage;
use parley_core::{Model, ModelFeature, ModelResponse, ModelType};
use parley_llm::{
    CompletionRequest, CostEntry, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter, ProviderEventStream,
    ProviderInfo, ProviderResult, UsageCostInfo,
};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::client::OpenAiClient;
use crate::protocol::{OpenAiProtocol, flavor_for};
use crate::types::{ApiFlavor, CostBucket, ListReply, ModelEntry, OpenAiConfig};

/// Provider ID.
pub const PROVIDER_ID: &str = "OPEN_AI";

/// Model ID prefixes that are neither chat, embedding nor image models.
const NON_CHAT_PREFIXES: &[&str] = &[
    "whisper",
    "tts",
    "babbage",
    "davinci",
    "omni-moderation",
    "text-moderation",
    "gpt-image",
    "gpt-4o-realtime",
    "gpt-4o-mini-realtime",
    "gpt-realtime",
    "gpt-4o-audio",
    "gpt-4o-mini-audio",
    "gpt-audio",
    "gpt-4o-transcribe",
    "gpt-4o-mini-transcribe",
    "gpt-4o-mini-tts",
    "sora",
];

/// Cost pages fetched per call.
const MAX_COST_PAGES: usize = 10;

const ADMIN_KEY_MISSING: &str =
    "OpenAI API admin key is not set. Set OPENAI_API_ADMIN_KEY in environment variables.";

/// Display name: `gpt-4-turbo` → `GPT 4 Turbo`.
pub fn model_name(id: &str) -> String {
    id.replacen("gpt", "GPT", 1)
        .replacen("dall-e", "DALL-E", 1)
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Catalog entry for a listed model, `None` for models that are skipped.
pub fn catalog_entry(id: &str) -> Option<Model> {
    let embedding = id.starts_with("text-embedding");
    let image = id.starts_with("dall-e");
    if NON_CHAT_PREFIXES.iter().any(|p| id.starts_with(p)) && !embedding && !image {
        return None;
    }
    let model_type = if embedding {
        ModelType::Embedding
    } else if image {
        ModelType::ImageGeneration
    } else {
        ModelType::Chat
    };
    let mut features = Vec::new();
    if model_type == ModelType::Chat {
        if flavor_for(id) == ApiFlavor::Responses {
            features.push(ModelFeature::RequestCancellation);
        }
        if id.starts_with('o') || id.starts_with("gpt-5") {
            features.push(ModelFeature::Reasoning);
        }
    }
    Some(Model {
        model_type,
        streaming: model_type == ModelType::Chat,
        features,
        ..Model::chat(id, model_name(id), PROVIDER_ID)
    })
}

/// Adapter for the OpenAI API.
#[derive(Clone, Debug)]
pub struct OpenAiAdapter {
    protocol: OpenAiProtocol,
}

impl OpenAiAdapter {
    /// Build an adapter; fails only when the HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        Ok(Self {
            protocol: OpenAiProtocol::new(OpenAiClient::new(config)?, PROVIDER_ID),
        })
    }

    fn config(&self) -> &OpenAiConfig {
        self.protocol.client().config()
    }

    async fn cost_buckets(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<Vec<CostBucket>> {
        let client = self.protocol.client();
        let mut buckets = Vec::new();
        let mut page: Option<String> = None;
        for _ in 0..MAX_COST_PAGES {
            let mut query = vec![
                ("group_by", "project_id".to_owned()),
                ("limit", "100".to_owned()),
                ("start_time", start.timestamp().to_string()),
                ("end_time", end.timestamp().to_string()),
            ];
            if let Some(page) = page.take() {
                query.push(("page", page));
            }
            let reply: ListReply<CostBucket> = client
                .get_json_with("organization/costs", &query, self.config().admin_key.as_ref())
                .await?;
            buckets.extend(reply.data);
            match reply.next_page {
                Some(next) if !next.is_empty() => page = Some(next),
                _ => break,
            }
        }
        Ok(buckets)
    }
}

/// Sum cost results per day, project and currency.
fn cost_entries(buckets: Vec<CostBucket>) -> Vec<CostEntry> {
    let mut sums: BTreeMap<(NaiveDate, String, String), f64> = BTreeMap::new();
    for bucket in buckets {
        let Some(date) = DateTime::from_timestamp(bucket.start_time, 0).map(|d| d.date_naive()) else {
            continue;
        };
        for result in bucket.results {
            let Some(amount) = result.amount.filter(|a| !a.currency.is_empty()) else {
                continue;
            };
            let item = result
                .project_id
                .or(result.line_item)
                .unwrap_or_else(|| "unknown".into());
            *sums.entry((date, item, amount.currency)).or_default() += amount.value;
        }
    }
    sums.into_iter()
        .map(|((date, item, currency), amount)| CostEntry {
            date,
            amount,
            currency,
            line_item: Some(item),
        })
        .collect()
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse> {
        self.protocol.complete_chat(request, history).await
    }

    fn stream_chat(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream {
        self.protocol.stream_chat(request, history)
    }

    async fn embeddings(&self, request: &EmbeddingsRequest) -> ProviderResult<EmbeddingsResponse> {
        self.protocol.embeddings(request).await
    }

    async fn models(&self) -> ProviderResult<HashMap<String, Model>> {
        let mut models = HashMap::new();
        match self.protocol.client().get_json::<ListReply<ModelEntry>>("models").await {
            Ok(reply) => {
                for entry in reply.data {
                    if let Some(model) = catalog_entry(&entry.id) {
                        let _ = models.insert(entry.id, model);
                    }
                }
            }
            Err(e) => error!(provider = PROVIDER_ID, error = %e, "failed to list models"),
        }
        if !models.contains_key("text-embedding-3-small") {
            let _ = models.insert(
                "text-embedding-3-small".into(),
                Model {
                    model_type: ModelType::Embedding,
                    streaming: false,
                    ..Model::chat("text-embedding-3-small", "Text Embedding 3 Small", PROVIDER_ID)
                },
            );
        }
        debug!(provider = PROVIDER_ID, count = models.len(), "models listed");
        Ok(models)
    }

    async fn costs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<UsageCostInfo> {
        let base = UsageCostInfo {
            start: Some(start),
            end: Some(end),
            ..UsageCostInfo::default()
        };
        if self.config().admin_key.is_none() {
            return Ok(UsageCostInfo {
                error: Some(ADMIN_KEY_MISSING.into()),
                ..base
            });
        }
        match self.cost_buckets(start, end).await {
            Ok(buckets) => Ok(UsageCostInfo {
                costs: cost_entries(buckets),
                ..base
            }),
            Err(e) => {
                error!(provider = PROVIDER_ID, error = %e, "failed to fetch usage costs");
                Ok(UsageCostInfo {
                    error: Some(e.to_string()),
                    ..base
                })
            }
        }
    }

    async fn stop_request(&self, request_id: &str) -> ProviderResult<()> {
        self.protocol.stop_request(request_id).await
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    async fn info(&self, test_connection: bool) -> ProviderResult<ProviderInfo> {
        let configured = self.config().api_key.is_some();
        let mut details = Map::new();
        let _ = details.insert("apiUrl".into(), Value::from(self.config().base_url.clone()));
        let _ = details.insert("configured".into(), Value::from(configured));
        let _ = details.insert("credentialsValid".into(), Value::from("N/A"));

        if configured && test_connection {
            let valid = match self.protocol.client().get_json::<Value>("models").await {
                Ok(_) => true,
                Err(e) => {
                    warn!(provider = PROVIDER_ID, error = %e, "connection test failed");
                    false
                }
            };
            let _ = details.insert("credentialsValid".into(), Value::from(valid));
        }

        Ok(ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "OpenAI".into(),
            is_connected: configured,
            costs_info_available: self.config().admin_key.is_some(),
            details,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
