//! AWS Bedrock adapter.
//!
//! Chat runs through the Converse API, embeddings through `InvokeModel`, and
//! costs come from Cost Explorer filtered to the Bedrock service. Clients are
//! built from the caller's static key pair; without one every inference call
//! fails with a configuration error.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_bedrockruntime::config::retry::RetryConfig;
use aws_sdk_bedrockruntime::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_costexplorer::types::{
    DateInterval, Dimension, DimensionValues, Expression, Granularity, GroupDefinition, GroupDefinitionType,
    ResultByTime,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use parley_core::messages::{ModelMessage, Usage};
use parley_core::{Model, ModelResponse, ModelType};
use parley_llm::stream_pipeline::enforce_contract;
use parley_llm::{
    CompletionRequest, CostEntry, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter, ProviderError,
    ProviderEventStream, ProviderInfo, ProviderResult, UsageCostInfo,
};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument};

use crate::convert::sdk_error;
use crate::converse::{self, Turn};
use crate::types::{
    BedrockConfig, CHAT_MODELS, CohereEmbeddingBody, EMBEDDING_MODELS, EmbeddingReply, NOT_INITIALIZED, PROVIDER_ID,
    TitanEmbeddingBody,
};

const CREDENTIALS_MISSING: &str =
    "AWS credentials are not set. Set AWS_BEDROCK_ACCESS_KEY_ID and AWS_BEDROCK_SECRET_ACCESS_KEY in connection settings.";

/// Bedrock adapter for one caller.
#[derive(Clone, Debug)]
pub struct BedrockAdapter {
    config: BedrockConfig,
    runtime: Option<aws_sdk_bedrockruntime::Client>,
    costs: Option<aws_sdk_costexplorer::Client>,
}

impl BedrockAdapter {
    /// Build the SDK clients from the caller's credentials.
    pub fn new(config: BedrockConfig) -> Self {
        let (runtime, costs) = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key_id), Some(secret)) if config.has_credentials() => {
                let credentials = Credentials::new(key_id, secret.expose_secret(), None, None, "parley");
                let retry = RetryConfig::standard().with_max_attempts(config.max_attempts.max(1));

                let mut runtime = aws_sdk_bedrockruntime::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials.clone())
                    .retry_config(retry.clone());
                if let Some(url) = &config.endpoint_url {
                    runtime = runtime.endpoint_url(url);
                }

                let costs = aws_sdk_costexplorer::Config::builder()
                    .behavior_version(aws_sdk_costexplorer::config::BehaviorVersion::latest())
                    .region(aws_sdk_costexplorer::config::Region::new(config.region.clone()))
                    .credentials_provider(credentials)
                    .retry_config(retry)
                    .build();

                (
                    Some(aws_sdk_bedrockruntime::Client::from_conf(runtime.build())),
                    Some(aws_sdk_costexplorer::Client::from_conf(costs)),
                )
            }
            _ => {
                debug!(provider = PROVIDER_ID, "no AWS credentials, Bedrock client not initialized");
                (None, None)
            }
        };
        Self { config, runtime, costs }
    }

    fn runtime(&self) -> ProviderResult<&aws_sdk_bedrockruntime::Client> {
        self.runtime.as_ref().ok_or_else(|| ProviderError::Auth {
            message: NOT_INITIALIZED.into(),
        })
    }

    fn turn(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderResult<Turn> {
        Ok(Turn {
            client: self.runtime()?.clone(),
            request,
            history,
            max_tool_rounds: self.config.max_tool_rounds,
        })
    }

    async fn fetch_costs(
        &self,
        client: &aws_sdk_costexplorer::Client,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ProviderResult<Vec<CostEntry>> {
        let period = DateInterval::builder()
            .start(start.format("%Y-%m-%d").to_string())
            .end(end.format("%Y-%m-%d").to_string())
            .build()
            .map_err(|e| ProviderError::other(e.to_string()))?;
        let reply = client
            .get_cost_and_usage()
            .time_period(period)
            .granularity(Granularity::Daily)
            .metrics("BlendedCost")
            .group_by(
                GroupDefinition::builder()
                    .r#type(GroupDefinitionType::Dimension)
                    .key("USAGE_TYPE")
                    .build(),
            )
            .filter(
                Expression::builder()
                    .dimensions(
                        DimensionValues::builder()
                            .key(Dimension::Service)
                            .values("Amazon Bedrock")
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(cost_entries(reply.results_by_time()))
    }
}

/// Model family billed under a Cost Explorer usage type.
pub fn model_family(usage_type: &str) -> &'static str {
    const FAMILIES: &[(&str, &str)] = &[
        ("Claude", "Anthropic Claude Models"),
        ("Titan", "Amazon Titan Models"),
        ("Nova", "Amazon Nova Models"),
        ("Jurassic", "AI21 Jurassic Models"),
        ("Command", "Cohere Command Models"),
        ("Llama", "Meta Llama Models"),
        ("Mistral", "Mistral AI Models"),
    ];
    FAMILIES
        .iter()
        .find(|(marker, _)| usage_type.contains(marker))
        .map_or("Other Models", |(_, family)| family)
}

/// Daily cost lines summed per model family and currency.
pub fn cost_entries(results: &[ResultByTime]) -> Vec<CostEntry> {
    let mut sums: BTreeMap<(NaiveDate, &'static str, String), f64> = BTreeMap::new();
    for result in results {
        let Some(date) = result
            .time_period()
            .and_then(|p| NaiveDate::parse_from_str(p.start(), "%Y-%m-%d").ok())
        else {
            continue;
        };
        for group in result.groups() {
            let Some(cost) = group.metrics().and_then(|m| m.get("BlendedCost")) else {
                continue;
            };
            let amount = cost.amount().and_then(|a| a.parse::<f64>().ok()).unwrap_or_default();
            let currency = cost.unit().unwrap_or("USD").to_owned();
            let family = model_family(group.keys().first().map_or("", String::as_str));
            *sums.entry((date, family, currency)).or_default() += amount;
        }
    }
    sums.into_iter()
        .map(|((date, family, currency), amount)| CostEntry {
            date,
            amount,
            currency,
            line_item: Some(family.to_owned()),
        })
        .collect()
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse> {
        let turn = self.turn(request.clone(), history.to_vec())?;
        converse::complete(&turn).await
    }

    fn stream_chat(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream {
        debug!(provider = PROVIDER_ID, model = %request.model_id, "streaming chat");
        let inner = match self.turn(request, history) {
            Ok(turn) => converse::stream(turn),
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        };
        enforce_contract(PROVIDER_ID, inner)
    }

    #[instrument(skip_all, fields(provider = PROVIDER_ID, model = %request.model_id))]
    async fn embeddings(&self, request: &EmbeddingsRequest) -> ProviderResult<EmbeddingsResponse> {
        let client = self.runtime()?;
        let body = if request.model_id == "cohere.embed-multilingual-v3" {
            serde_json::to_vec(&CohereEmbeddingBody {
                texts: [&request.input],
                input_type: "search_query",
                truncate: "END",
                dimensions: request.dimensions,
            })?
        } else {
            serde_json::to_vec(&TitanEmbeddingBody {
                input_text: &request.input,
                dimensions: request.dimensions.filter(|_| request.model_id.contains("embed-text-v2")),
            })?
        };
        let output = client
            .invoke_model()
            .model_id(&request.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(sdk_error)?;
        let reply: EmbeddingReply = serde_json::from_slice(output.body().as_ref())?;
        let input_tokens = reply.input_text_token_count.unwrap_or_default();
        Ok(EmbeddingsResponse {
            embedding: reply.into_vector(),
            usage: Some(Usage {
                input_tokens,
                output_tokens: 0,
            }),
        })
    }

    async fn models(&self) -> ProviderResult<HashMap<String, Model>> {
        if self.runtime.is_none() {
            return Ok(HashMap::new());
        }
        let chat = CHAT_MODELS
            .iter()
            .map(|(id, name)| ((*id).to_owned(), Model::chat(*id, *name, PROVIDER_ID)));
        let embedding = EMBEDDING_MODELS.iter().map(|(id, name)| {
            let model = Model {
                model_type: ModelType::Embedding,
                streaming: false,
                ..Model::chat(*id, *name, PROVIDER_ID)
            };
            ((*id).to_owned(), model)
        });
        Ok(chat.chain(embedding).collect())
    }

    async fn costs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<UsageCostInfo> {
        let period = UsageCostInfo {
            start: Some(start),
            end: Some(end),
            ..UsageCostInfo::default()
        };
        let Some(client) = &self.costs else {
            return Ok(UsageCostInfo {
                error: Some(CREDENTIALS_MISSING.into()),
                ..period
            });
        };
        // The end date is exclusive and must follow the start.
        let first = start.date_naive();
        let last = end.date_naive().max(first.checked_add_days(Days::new(1)).unwrap_or(first));
        match self.fetch_costs(client, first, last).await {
            Ok(costs) => Ok(UsageCostInfo { costs, ..period }),
            Err(e) => {
                error!(provider = PROVIDER_ID, error = %e, "failed to fetch costs");
                Ok(UsageCostInfo {
                    error: Some(e.to_string()),
                    ..period
                })
            }
        }
    }

    async fn stop_request(&self, _request_id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("stop_request"))
    }

    async fn info(&self, _test_connection: bool) -> ProviderResult<ProviderInfo> {
        let configured = self.runtime.is_some();
        let mut details = Map::new();
        let _ = details.insert("region".into(), Value::from(self.config.region.clone()));
        let _ = details.insert("configured".into(), Value::from(configured));
        Ok(ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "AWS Bedrock".into(),
            is_connected: configured,
            costs_info_available: configured,
            details,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
