//! # Converse request building
//!
//! Maps parley history, tools and sampling options onto the Converse API
//! shapes, and SDK errors back onto [`ProviderError`].
//!
//! - Assistant and error turns are sent as `assistant`, everything else as `user`
//! - Images must be inline (base64 or `data:` URL); URL-only images are dropped
//! - Tool schemas and tool-use inputs travel as Smithy documents
//! - Titan models take no system prompt; Nova models are pinned to the first
//!   tool on the first round only

use aws_sdk_bedrockruntime::error::SdkError;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ImageBlock, ImageFormat, ImageSource, InferenceConfiguration, Message,
    SpecificToolChoice, SystemContentBlock, Tool, ToolChoice, ToolConfiguration, ToolInputSchema, ToolResultBlock,
    ToolResultContentBlock, ToolResultStatus, ToolSpecification, ToolUseBlock,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types::{Blob, Document, Number};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parley_core::messages::{ContentPart, MessageBody, MessageRole, ModelMessage};
use parley_core::{ToolCallRecord, ToolDefinition, ToolResultRecord};
use parley_llm::{CompletionRequest, ProviderError, ProviderResult};
use serde_json::Value;
use tracing::warn;

use crate::types::PROVIDER_ID;

fn invalid(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::other(format!("Invalid Bedrock request: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Documents
// ─────────────────────────────────────────────────────────────────────────────

/// JSON value as a Smithy document.
pub fn to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => Document::Number(match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => Number::PosInt(u),
            (None, Some(i)) => Number::NegInt(i),
            (None, None) => Number::Float(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(to_document).collect()),
        Value::Object(map) => Document::Object(map.iter().map(|(k, v)| (k.clone(), to_document(v))).collect()),
    }
}

/// Smithy document as a JSON value. Non-finite floats become `null`.
pub fn from_document(document: &Document) -> Value {
    match document {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(Number::PosInt(u)) => Value::from(*u),
        Document::Number(Number::NegInt(i)) => Value::from(*i),
        Document::Number(Number::Float(f)) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(from_document).collect()),
        Document::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), from_document(v))).collect()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

fn role_for(role: MessageRole) -> ConversationRole {
    match role {
        MessageRole::Assistant | MessageRole::Error => ConversationRole::Assistant,
        MessageRole::User | MessageRole::System => ConversationRole::User,
    }
}

fn message(role: ConversationRole, content: Vec<ContentBlock>) -> ProviderResult<Message> {
    Message::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(invalid)
}

/// Decode an inline image into an image block.
pub fn image_block(content: Option<&str>, mime_type: Option<&str>) -> Option<ContentBlock> {
    let payload = content.map(str::trim).filter(|s| !s.is_empty())?;
    let (inline_mime, data) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest.split_once(',')?;
            (meta.split(';').next(), data)
        }
        None => (None, payload),
    };
    let format = match inline_mime.or(mime_type).unwrap_or("image/png").trim_start_matches("image/") {
        "png" => ImageFormat::Png,
        "jpeg" | "jpg" => ImageFormat::Jpeg,
        "gif" => ImageFormat::Gif,
        "webp" => ImageFormat::Webp,
        _ => return None,
    };
    let bytes = BASE64.decode(data).ok()?;
    ImageBlock::builder()
        .format(format)
        .source(ImageSource::Bytes(Blob::new(bytes)))
        .build()
        .ok()
        .map(ContentBlock::Image)
}

fn content_blocks(body: &MessageBody) -> Vec<ContentBlock> {
    match body {
        MessageBody::Text(text) if text.is_empty() => Vec::new(),
        MessageBody::Text(text) => vec![ContentBlock::Text(text.clone())],
        MessageBody::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { content } if content.is_empty() => None,
                ContentPart::Text { content } => Some(ContentBlock::Text(content.clone())),
                ContentPart::Image { content, mime_type, .. } => {
                    let block = image_block(content.as_deref(), mime_type.as_deref());
                    if block.is_none() {
                        warn!(provider = PROVIDER_ID, part = "image", "image without inline content dropped");
                    }
                    block
                }
                ContentPart::Video { .. } => {
                    warn!(provider = PROVIDER_ID, part = "video", "unsupported content part dropped");
                    None
                }
            })
            .collect(),
    }
}

/// Converse message list for a history. Turns left empty after conversion
/// are skipped.
pub fn to_messages(history: &[ModelMessage]) -> ProviderResult<Vec<Message>> {
    history
        .iter()
        .filter_map(|msg| {
            let content = content_blocks(&msg.body);
            (!content.is_empty()).then(|| message(role_for(msg.role), content))
        })
        .collect()
}

/// Assistant message echoing the round's text and tool uses.
pub fn tool_use_message(text: &str, calls: &[ToolCallRecord]) -> ProviderResult<Message> {
    let mut content = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        content.push(ContentBlock::Text(text.to_owned()));
    }
    for call in calls {
        let block = ToolUseBlock::builder()
            .tool_use_id(&call.call_id)
            .name(&call.name)
            .input(to_document(&Value::Object(call.arguments.clone())))
            .build()
            .map_err(invalid)?;
        content.push(ContentBlock::ToolUse(block));
    }
    message(ConversationRole::Assistant, content)
}

/// User message carrying the round's tool results.
pub fn tool_result_message(results: &[ToolResultRecord]) -> ProviderResult<Message> {
    let content = results
        .iter()
        .map(|r| {
            ToolResultBlock::builder()
                .tool_use_id(&r.call_id)
                .content(ToolResultContentBlock::Text(r.content.clone()))
                .set_status(r.is_error.then_some(ToolResultStatus::Error))
                .build()
                .map(ContentBlock::ToolResult)
                .map_err(invalid)
        })
        .collect::<ProviderResult<Vec<_>>>()?;
    message(ConversationRole::User, content)
}

// ─────────────────────────────────────────────────────────────────────────────
// Request options
// ─────────────────────────────────────────────────────────────────────────────

/// System prompt blocks. Titan models reject them.
pub fn system_blocks(model: &str, prompt: Option<&str>) -> Option<Vec<SystemContentBlock>> {
    prompt
        .filter(|p| !p.trim().is_empty() && !model.contains("amazon.titan"))
        .map(|p| vec![SystemContentBlock::Text(p.to_owned())])
}

/// Sampling options. Claude Sonnet 4.5 rejects `temperature` and `top_p`
/// together, so `top_p` is dropped for it.
pub fn inference_config(model: &str, request: &CompletionRequest) -> InferenceConfiguration {
    let top_p = request
        .top_p
        .filter(|_| !(model.contains("claude-sonnet-4-5") && request.temperature.is_some()));
    InferenceConfiguration::builder()
        .set_max_tokens(request.max_tokens.and_then(|t| i32::try_from(t).ok()))
        .set_temperature(request.temperature)
        .set_top_p(top_p)
        .build()
}

/// Tool configuration, or `None` without tools.
pub fn tool_config(model: &str, definitions: &[ToolDefinition], round: u32) -> ProviderResult<Option<ToolConfiguration>> {
    let Some(first) = definitions.first() else {
        return Ok(None);
    };
    let tools = definitions
        .iter()
        .map(|d| {
            ToolSpecification::builder()
                .name(&d.name)
                .description(&d.description)
                .input_schema(ToolInputSchema::Json(to_document(&d.parameters)))
                .build()
                .map(Tool::ToolSpec)
                .map_err(invalid)
        })
        .collect::<ProviderResult<Vec<_>>>()?;
    let mut builder = ToolConfiguration::builder().set_tools(Some(tools));
    if round == 0 && model.contains("amazon.nova") {
        let choice = SpecificToolChoice::builder().name(&first.name).build().map_err(invalid)?;
        builder = builder.tool_choice(ToolChoice::Tool(choice));
    }
    builder.build().map(Some).map_err(invalid)
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Map a Bedrock error code and message onto a provider error.
pub fn classify(code: Option<&str>, message: String) -> ProviderError {
    let owned = code.map(str::to_owned);
    match code {
        Some("ThrottlingException" | "ServiceQuotaExceededException" | "TooManyRequestsException") => {
            ProviderError::RateLimited {
                retry_after_ms: 0,
                message,
            }
        }
        Some(
            "AccessDeniedException" | "UnrecognizedClientException" | "ExpiredTokenException"
            | "InvalidSignatureException",
        ) => ProviderError::Auth { message },
        Some("ValidationException" | "ResourceNotFoundException" | "DataUnavailableException") => {
            ProviderError::Api {
                status: 400,
                message,
                code: owned,
                retryable: false,
            }
        }
        Some(
            "ModelTimeoutException" | "ModelNotReadyException" | "ServiceUnavailableException"
            | "InternalServerException" | "ModelStreamErrorException",
        ) => ProviderError::Api {
            status: 503,
            message,
            code: owned,
            retryable: true,
        },
        Some(_) => ProviderError::Api {
            status: 500,
            message,
            code: owned,
            retryable: false,
        },
        None => ProviderError::other(message),
    }
}

/// Convert any SDK call error.
pub fn sdk_error<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_owned);
    let message = err
        .message()
        .map_or_else(|| DisplayErrorContext(&err).to_string(), str::to_owned);
    classify(code.as_deref(), message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
