//! # Message conversion
//!
//! Maps parley history onto the two OpenAI request shapes.
//!
//! Key behaviors:
//! - `system` turns become `developer` for reasoning-era models (`o1`, `o4`,
//!   `gpt-5`), `error` turns are replayed as `assistant`
//! - Images become data URLs; a bare base64 payload is assumed to be PNG
//! - Video and other unsupported parts are dropped with a warning
//! - Temperature is removed (or pinned) for models that reject it

use parley_core::messages::{ContentPart, MessageBody, MessageRole, ModelMessage};
use parley_core::{ToolDefinition, ToolType};
use tracing::warn;

use crate::types::{
    ChatContent, ChatContentPart, ChatMessage, ChatToolDefinition, CodeContainer,
    FunctionDefinition, ImageUrl, InputContent, ResponsesInputItem, ResponsesTool,
};

/// Hosted web search tool name, replaced by the backend's own search.
pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

const DEVELOPER_ROLE_PREFIXES: &[&str] = &["o1", "o4", "gpt-5"];

/// Role used for the system prompt of `model`.
pub fn system_role_for(model: &str) -> &'static str {
    if DEVELOPER_ROLE_PREFIXES.iter().any(|p| model.starts_with(p)) {
        "developer"
    } else {
        "system"
    }
}

fn map_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant | MessageRole::Error => "assistant",
        MessageRole::System => "developer",
    }
}

/// Temperature to send to a chat-completions model.
pub fn completions_temperature(model: &str, requested: Option<f32>) -> Option<f32> {
    if model.starts_with("o1") || model.starts_with("o4") || model.starts_with("gpt-4o") {
        None
    } else if model.starts_with("gpt-5") {
        Some(1.0)
    } else {
        requested
    }
}

/// Temperature to send to a Responses model.
pub fn responses_temperature(model: &str, requested: Option<f32>) -> Option<f32> {
    if ["o1", "o4", "gpt-4o", "gpt-5"].iter().any(|p| model.starts_with(p)) {
        None
    } else {
        requested
    }
}

/// Turn stored image content into something the API accepts.
///
/// Prefers an inline payload, then a public URL. Bare base64 gets a PNG
/// data-URL prefix.
pub fn image_url(content: Option<&str>, url: Option<&str>, mime_type: Option<&str>) -> Option<String> {
    if let Some(payload) = content.map(str::trim).filter(|s| !s.is_empty()) {
        if payload.starts_with("data:") || payload.starts_with("http://") || payload.starts_with("https://") {
            return Some(payload.to_owned());
        }
        let mime = mime_type.filter(|m| m.starts_with("image/")).unwrap_or("image/png");
        return Some(format!("data:{mime};base64,{payload}"));
    }
    url.filter(|u| !u.is_empty()).map(str::to_owned)
}

fn dropped_part(kind: &str, provider: &str) {
    warn!(provider, part = kind, "unsupported content part dropped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat completions
// ─────────────────────────────────────────────────────────────────────────────

/// Build the chat-completions message list, system prompt first.
pub fn to_chat_messages(
    model: &str,
    system_prompt: Option<&str>,
    history: &[ModelMessage],
    provider: &str,
) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
        out.push(ChatMessage::text(system_role_for(model), prompt));
    }
    for msg in history {
        let role = if msg.role == MessageRole::System {
            system_role_for(model)
        } else {
            map_role(msg.role)
        };
        let content = match &msg.body {
            MessageBody::Text(text) => ChatContent::Text(text.clone()),
            MessageBody::Parts(parts) => {
                let parts: Vec<_> = parts
                    .iter()
                    .filter_map(|part| chat_part(part, provider))
                    .collect();
                if parts.is_empty() {
                    continue;
                }
                ChatContent::Parts(parts)
            }
        };
        out.push(ChatMessage {
            role: role.to_owned(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    out
}

fn chat_part(part: &ContentPart, provider: &str) -> Option<ChatContentPart> {
    match part {
        ContentPart::Text { content } if content.is_empty() => None,
        ContentPart::Text { content } => Some(ChatContentPart::Text {
            text: content.clone(),
        }),
        ContentPart::Image {
            content,
            url,
            mime_type,
            ..
        } => {
            let url = image_url(content.as_deref(), url.as_deref(), mime_type.as_deref());
            if url.is_none() {
                dropped_part("image", provider);
            }
            url.map(|url| ChatContentPart::ImageUrl {
                image_url: ImageUrl { url },
            })
        }
        ContentPart::Video { .. } => {
            dropped_part("video", provider);
            None
        }
    }
}

/// Function tool list for chat completions.
pub fn to_chat_tools(definitions: &[ToolDefinition]) -> Option<Vec<ChatToolDefinition>> {
    if definitions.is_empty() {
        return None;
    }
    Some(
        definitions
            .iter()
            .map(|d| ChatToolDefinition {
                tool_type: "function",
                function: FunctionDefinition {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    parameters: d.parameters.clone(),
                },
            })
            .collect(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Build Responses input items. The system prompt travels as `instructions`.
pub fn to_responses_input(history: &[ModelMessage], provider: &str) -> Vec<ResponsesInputItem> {
    let mut input = Vec::with_capacity(history.len());
    for msg in history {
        let mut role = map_role(msg.role);
        let mut content = Vec::new();
        let parts = match &msg.body {
            MessageBody::Text(text) => vec![ContentPart::text(text.clone())],
            MessageBody::Parts(parts) => parts.clone(),
        };
        for part in &parts {
            match part {
                ContentPart::Text { content: text } if text.is_empty() => {}
                ContentPart::Text { content: text } => content.push(text_input(role, text)),
                ContentPart::Image {
                    content: payload,
                    url,
                    mime_type,
                    ..
                } => match image_url(payload.as_deref(), url.as_deref(), mime_type.as_deref()) {
                    Some(image_url) => {
                        // images are only accepted on user input
                        role = "user";
                        content.push(InputContent::InputImage {
                            image_url,
                            detail: "auto",
                        });
                    }
                    None => dropped_part("image", provider),
                },
                ContentPart::Video { .. } => dropped_part("video", provider),
            }
        }
        if content.is_empty() {
            continue;
        }
        if role == "user" {
            for item in &mut content {
                if let InputContent::OutputText { text } = item {
                    *item = InputContent::InputText {
                        text: std::mem::take(text),
                    };
                }
            }
        }
        input.push(ResponsesInputItem::Message {
            role: role.to_owned(),
            content,
        });
    }
    input
}

fn text_input(role: &str, text: &str) -> InputContent {
    if role == "assistant" {
        InputContent::OutputText { text: text.to_owned() }
    } else {
        InputContent::InputText { text: text.to_owned() }
    }
}

/// Responses tool list: hosted tools first, then function tools.
///
/// A function tool that shares its name with a hosted tool is skipped, the
/// backend's own implementation wins.
pub fn to_responses_tools(hosted: &[ToolType], definitions: &[ToolDefinition]) -> Option<Vec<ResponsesTool>> {
    let mut tools = Vec::new();
    let hosted_search = hosted.contains(&ToolType::WebSearch);
    if hosted_search {
        tools.push(ResponsesTool::WebSearch {
            search_context_size: "low",
        });
    }
    if hosted.contains(&ToolType::CodeInterpreter) {
        tools.push(ResponsesTool::CodeInterpreter {
            container: CodeContainer { container_type: "auto" },
        });
    }
    tools.extend(
        definitions
            .iter()
            .filter(|d| !(hosted_search && d.name == WEB_SEARCH_TOOL_NAME))
            .map(|d| ResponsesTool::Function {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.parameters.clone(),
            }),
    );
    (!tools.is_empty()).then_some(tools)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
