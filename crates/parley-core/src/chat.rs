//! Chats (conversations) and their generation settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, McpServerId};

/// Kind of tool a chat can enable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Built-in web search.
    WebSearch,
    /// Backend-side code interpreter.
    CodeInterpreter,
    /// External MCP tool server.
    Mcp,
}

/// A tool enabled on a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTool {
    /// Tool kind.
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    /// MCP server ID when `tool_type` is `mcp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<McpServerId>,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl ChatTool {
    /// Web search entry.
    pub fn web_search() -> Self {
        Self {
            tool_type: ToolType::WebSearch,
            id: None,
            name: "web_search".into(),
        }
    }

    /// MCP server entry.
    pub fn mcp(server_id: McpServerId, name: impl Into<String>) -> Self {
        Self {
            tool_type: ToolType::Mcp,
            id: Some(server_id),
            name: name.into(),
        }
    }
}

/// Generation parameters. Unset fields fall back to user and global defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Output token limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Images per request for image models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_count: Option<u32>,
    /// System prompt override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Enable extended reasoning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
    /// Reasoning token budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl ChatSettings {
    /// Overlay every field set in `over` onto `self`.
    #[must_use]
    pub fn overlay(mut self, over: &ChatSettings) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if over.$field.is_some() {
                    self.$field.clone_from(&over.$field);
                })*
            };
        }
        take!(
            temperature,
            max_tokens,
            top_p,
            images_count,
            system_prompt,
            thinking,
            thinking_budget
        );
        self
    }
}

/// A conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Chat ID.
    pub id: ChatId,
    /// Title, synthesized after the first answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Active model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Generation settings.
    #[serde(default)]
    pub settings: ChatSettings,
    /// Enabled tools.
    #[serde(default)]
    pub tools: Vec<ChatTool>,
    /// True until the first exchange completes.
    pub is_pristine: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// A new, pristine, untitled chat.
    pub fn new(model_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ChatId::new(),
            title: None,
            model_id,
            settings: ChatSettings::default(),
            tools: Vec::new(),
            is_pristine: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a title should still be synthesized.
    pub fn needs_title(&self) -> bool {
        self.is_pristine || self.title.as_deref().is_none_or(str::is_empty)
    }

    /// Whether the chat enables the given tool kind.
    pub fn has_tool(&self, tool_type: ToolType) -> bool {
        self.tools.iter().any(|t| t.tool_type == tool_type)
    }
}
