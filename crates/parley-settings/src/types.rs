//! Settings types.
//!
//! Every struct uses `#[serde(default)]`, so a settings file only needs the
//! keys it overrides.

use parley_core::retry::{RateLimitRetry, ReconnectBackoff};
use parley_core::tools::McpServer;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// HTTP server.
    pub server: ServerSettings,
    /// Provider adapters.
    pub providers: ProviderSettings,
    /// Generation defaults and context limits.
    pub ai: AiSettings,
    /// Streaming broadcast throttle.
    pub streaming: StreamingSettings,
    /// Retrieval-augmented answering.
    pub rag: RagSettings,
    /// Cross-instance fan-out.
    pub fanout: FanoutSettings,
    /// Web search backend.
    pub search: SearchSettings,
    /// Statically configured MCP servers.
    pub mcp_servers: Vec<McpServer>,
    /// Logging.
    pub logging: LoggingSettings,
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4000,
            cors_origins: Vec::new(),
        }
    }
}

/// Provider adapter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Enabled provider IDs. `["*"]` enables every known provider.
    pub enabled: Vec<String>,
    /// OpenAI API base URL.
    pub openai_base_url: String,
    /// Yandex OpenAI-compatible endpoint.
    pub yandex_openai_url: String,
    /// Yandex Foundation Models API root (embeddings).
    pub yandex_fm_url: String,
    /// Bedrock region used when the caller sends none.
    pub bedrock_region: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle timeout between SSE chunks in milliseconds.
    pub stream_idle_timeout_ms: u64,
    /// Rate-limit retry policy.
    pub rate_limit: RateLimitRetry,
    /// Maximum tool-call rounds per request.
    pub max_tool_rounds: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: vec!["OPEN_AI".into(), "CUSTOM_REST_API".into()],
            openai_base_url: "https://api.openai.com/v1".into(),
            yandex_openai_url: "https://llm.api.cloud.yandex.net/v1".into(),
            yandex_fm_url: "https://llm.api.cloud.yandex.net".into(),
            bedrock_region: "us-east-1".into(),
            connect_timeout_ms: 30_000,
            stream_idle_timeout_ms: 120_000,
            rate_limit: RateLimitRetry::default(),
            max_tool_rounds: 8,
        }
    }
}

impl ProviderSettings {
    /// Whether the provider ID is on the allow-list.
    pub fn is_enabled(&self, provider_id: &str) -> bool {
        self.enabled.iter().any(|p| p == "*" || p == provider_id)
    }
}

/// Generation defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiSettings {
    /// Default sampling temperature.
    pub default_temperature: f32,
    /// Default output token limit.
    pub default_max_tokens: u32,
    /// Default nucleus sampling.
    pub default_top_p: f32,
    /// Default system prompt.
    pub default_system_prompt: String,
    /// Messages loaded as context for a new answer.
    pub context_messages_limit: usize,
    /// Temperature for chat title synthesis.
    pub summarizing_temperature: f32,
    /// Output token limit for chat title synthesis.
    pub title_max_tokens: u32,
    /// Model used for titles when the answering model is not a chat model.
    pub default_model_id: Option<String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            default_temperature: 0.7,
            default_max_tokens: 2048,
            default_top_p: 0.9,
            default_system_prompt: "You are a helpful assistant. Format answers in Markdown.".into(),
            context_messages_limit: 100,
            summarizing_temperature: 0.25,
            title_max_tokens: 10,
            default_model_id: None,
        }
    }
}

/// Streaming broadcast throttle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingSettings {
    /// Minimum interval between intermediate broadcasts in milliseconds.
    pub min_update_interval_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 30,
        }
    }
}

/// Retrieval-augmented answering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RagSettings {
    /// Initial number of chunks retrieved per question.
    pub query_chunks_limit: usize,
    /// Whether to load whole pages around matching chunks.
    pub load_full_pages: bool,
    /// The chunk limit is halved on oversized requests until it reaches this floor.
    pub floor: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            query_chunks_limit: 10,
            load_full_pages: true,
            floor: 1,
        }
    }
}

/// Cross-instance fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Channel for message pointers.
    pub channel_chat_message: String,
    /// Channel for chat errors.
    pub channel_chat_error: String,
    /// Channel for document status updates.
    pub channel_document_status: String,
    /// Lifetime of cached message snapshots in seconds.
    pub message_expiration_secs: u64,
    /// Substrate reconnect policy.
    pub reconnect: ReconnectBackoff,
    /// Capacity of the local broadcast channel.
    pub local_channel_capacity: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            channel_chat_message: "chat:message".into(),
            channel_chat_error: "chat:error".into(),
            channel_document_status: "document:status".into(),
            message_expiration_secs: 300,
            reconnect: ReconnectBackoff::default(),
            local_channel_capacity: 1024,
        }
    }
}

/// Web search backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    /// Search API base URL. Web search is disabled when unset.
    pub base_url: Option<String>,
    /// Results per query when the model does not ask for a limit.
    pub default_limit: u32,
    /// Upper bound for a model-requested limit.
    pub max_limit: u32,
    /// Characters of page content kept per result.
    pub max_content_length: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            default_limit: 3,
            max_limit: 10,
            max_content_length: 1024,
        }
    }
}

/// Logging.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
