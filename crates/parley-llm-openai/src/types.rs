//! Configuration and wire types for the OpenAI protocols.
//!
//! Two request families share one configuration:
//! - **Chat completions** (`POST /chat/completions`): classic role/content
//!   messages, tool calls streamed as indexed deltas.
//! - **Responses** (`POST /responses`): typed input items, hosted tools, and
//!   background jobs that can be cancelled by response ID.

use std::time::Duration;

use parley_core::messages::Usage;
use parley_core::retry::RateLimitRetry;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Public OpenAI endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default tool round limit per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

/// Embedding width requested from `text-embedding-3-large`.
pub const EMBEDDINGS_DIMENSIONS: u32 = 1536;

/// Placeholder content when a Responses answer has no text.
pub const NO_RESPONSE: &str = "_No response_";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which OpenAI request family to speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `POST /chat/completions`. No native cancellation.
    Completions,
    /// `POST /responses` with `background: true`. Cancellable.
    Responses,
}

/// Connection settings shared by every adapter in this crate.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, without a trailing slash.
    pub base_url: String,
    /// Bearer key for inference calls.
    pub api_key: Option<SecretString>,
    /// Organization admin key for the costs endpoint.
    pub admin_key: Option<SecretString>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two SSE events.
    pub idle_timeout: Duration,
    /// 429 handling.
    pub rate_limit: RateLimitRetry,
    /// Upper bound on tool-call rounds in one turn.
    pub max_tool_rounds: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            admin_key: None,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            rate_limit: RateLimitRetry::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl OpenAiConfig {
    /// Config for `base_url` authenticated with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: Some(api_key),
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat completions: request
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /chat/completions` body.
#[derive(Clone, Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatToolDefinition>>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// One chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain text message.
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(ChatContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Tool result message.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(ChatContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat completions: responses
// ─────────────────────────────────────────────────────────────────────────────

/// One streamed `chat.completion.chunk`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChunkDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Non-streaming `chat.completion`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatCompletionResponse {
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompletionMessage {
    pub content: Option<String>,
    pub refusal: Option<String>,
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl From<ChatUsage> for Usage {
    fn from(u: ChatUsage) -> Self {
        Self {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses: request
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /responses` body.
#[derive(Clone, Debug, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesInputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReasoningConfig {
    pub effort: &'static str,
    pub summary: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    Message {
        role: String,
        content: Vec<InputContent>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText { text: String },
    InputImage { image_url: String, detail: &'static str },
    OutputText { text: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesTool {
    Function {
        name: String,
        description: String,
        parameters: Value,
    },
    WebSearch {
        search_context_size: &'static str,
    },
    CodeInterpreter {
        container: CodeContainer,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CodeContainer {
    #[serde(rename = "type")]
    pub container_type: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses: events and results
// ─────────────────────────────────────────────────────────────────────────────

/// Responses SSE event types this crate reacts to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum ResponsesEventType {
    #[serde(rename = "response.created")]
    Created,
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta,
    #[serde(
        rename = "response.web_search_call.in_progress",
        alias = "response.web_search_call.searching",
        alias = "response.web_search_call.completed"
    )]
    WebSearch,
    #[serde(rename = "response.code_interpreter_call.in_progress")]
    CodeInterpreterInProgress,
    #[serde(rename = "response.code_interpreter_call.interpreting")]
    CodeInterpreterInterpreting,
    #[serde(rename = "response.code_interpreter_call_code.delta")]
    CodeInterpreterCodeDelta,
    #[serde(rename = "response.code_interpreter_call_code.done")]
    CodeInterpreterCodeDone,
    #[serde(rename = "response.output_item.done")]
    OutputItemDone,
    #[serde(rename = "response.completed", alias = "response.incomplete")]
    Completed,
    #[serde(rename = "response.failed")]
    Failed,
    #[serde(rename = "error")]
    Error,
    #[default]
    #[serde(other)]
    Other,
}

/// One Responses SSE payload.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsesStreamEvent {
    #[serde(rename = "type")]
    pub event_type: ResponsesEventType,
    pub delta: Option<String>,
    pub item: Option<ResponsesOutputItem>,
    pub item_id: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub sequence_number: Option<u64>,
    pub response: Option<ResponsesResponse>,
}

/// A Responses object, streamed or returned whole.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsesResponse {
    pub id: String,
    pub status: Option<String>,
    pub output: Vec<ResponsesOutputItem>,
    pub usage: Option<ResponsesUsage>,
    pub error: Option<ResponsesErrorBody>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsesErrorBody {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsesOutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: Option<String>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub action: Option<Value>,
    pub summary: Vec<Value>,
    pub content: Vec<OutputContent>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: Option<String>,
    pub refusal: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsesUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl From<ResponsesUsage> for Usage {
    fn from(u: ResponsesUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embeddings, models, costs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct EmbeddingsBody<'a> {
    pub model: &'a str,
    pub input: &'a str,
    pub encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingsReply {
    pub data: Vec<EmbeddingData>,
    pub usage: Option<ChatUsage>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
}

/// A paged OpenAI list.
#[derive(Clone, Debug, Deserialize)]
pub struct ListReply<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next_page: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CostBucket {
    pub start_time: i64,
    pub results: Vec<CostResult>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CostResult {
    pub amount: Option<CostAmount>,
    pub line_item: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CostAmount {
    pub value: f64,
    pub currency: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_aliases() {
        let e: ResponsesStreamEvent =
            serde_json::from_value(json!({"type": "response.web_search_call.searching"})).unwrap();
        assert_eq!(e.event_type, ResponsesEventType::WebSearch);
        let e: ResponsesStreamEvent =
            serde_json::from_value(json!({"type": "response.incomplete", "response": {"id": "r"}})).unwrap();
        assert_eq!(e.event_type, ResponsesEventType::Completed);
        let e: ResponsesStreamEvent =
            serde_json::from_value(json!({"type": "response.output_item.added"})).unwrap();
        assert_eq!(e.event_type, ResponsesEventType::Other);
    }

    #[test]
    fn hosted_tool_shapes() {
        let web = serde_json::to_value(ResponsesTool::WebSearch {
            search_context_size: "low",
        })
        .unwrap();
        assert_eq!(web, json!({"type": "web_search", "search_context_size": "low"}));
        let code = serde_json::to_value(ResponsesTool::CodeInterpreter {
            container: CodeContainer { container_type: "auto" },
        })
        .unwrap();
        assert_eq!(code, json!({"type": "code_interpreter", "container": {"type": "auto"}}));
    }

    #[test]
    fn chat_message_omits_empty_fields() {
        let msg = serde_json::to_value(ChatMessage::text("user", "hi")).unwrap();
        assert_eq!(msg, json!({"role": "user", "content": "hi"}));
        let tool = serde_json::to_value(ChatMessage::tool_result("c1", "r")).unwrap();
        assert_eq!(tool["tool_call_id"], "c1");
    }

    #[test]
    fn config_trims_trailing_slash() {
        let cfg = OpenAiConfig::new("http://localhost:8080/v1/", SecretString::from("k"));
        assert_eq!(cfg.base_url, "http://localhost:8080/v1");
        assert_eq!(cfg.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
    }
}
