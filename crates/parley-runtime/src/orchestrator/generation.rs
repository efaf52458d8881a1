//! Direct answer generation: streaming and one-shot paths, and the terminal
//! transition shared with retrieval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use parley_core::{
    Chat, ChatSettings, McpServerId, Message, MessageMetadata, MessageRole, Model, ModelFeature, ModelMessage,
    ProgressUpdate, ProviderEvent, StreamStatus, ToolType,
};
use parley_llm::{CompletionRequest, ToolExecutor};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{CANCELLED, NO_RESPONSE, Orchestrator, Turn};
use crate::collaborators::RequestContext;

/// How a generation ended.
pub(super) enum Outcome {
    /// The model answered.
    Answered { content: String, metadata: MessageMetadata },
    /// The turn was found in the cancellation registry. Carries the text
    /// accumulated so far.
    Cancelled { partial: String },
    /// Provider or processing failure.
    Failed(String),
}

/// Gate for intermediate broadcasts.
struct FlushThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl FlushThrottle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn ready(&mut self, force: bool) -> bool {
        let now = Instant::now();
        if force || self.last.is_none_or(|last| now.duration_since(last) >= self.interval) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

/// Status line shown next to an in-progress turn.
fn status_info(update: &ProgressUpdate, step: usize) -> Option<String> {
    match update.status {
        Some(status) if status.is_stepwise() => Some(update.detail.clone().unwrap_or_else(|| format!("Step #{step}"))),
        _ => update.detail.clone(),
    }
}

impl Orchestrator {
    #[instrument(skip_all, fields(chat_id = %turn.chat.id, message_id = %turn.assistant.id, model = %turn.model.model_id))]
    pub(super) async fn generate(&self, turn: Turn) {
        let Turn {
            mut chat,
            model,
            context,
            history,
            mut assistant,
        } = turn;

        let request = self.completion_request(&chat, &model, &context, &assistant).await;
        self.inner.fanout.publish_chat_message(&chat, &assistant, true).await;

        let question = history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let history: Vec<ModelMessage> = history.iter().map(Message::to_model_message).collect();
        debug!(turns = history.len(), streaming = model.streaming, "generating answer");

        let outcome = if model.streaming {
            self.consume_stream(&chat, &model, &context, request, history, &mut assistant).await
        } else {
            match self.inner.gateway.complete_chat(&model, &context.connection, request, history).await {
                Ok(response) => Outcome::Answered {
                    content: response.content,
                    metadata: response.metadata,
                },
                Err(e) => Outcome::Failed(e.to_string()),
            }
        };
        self.finish(&mut chat, &model, &context, &question, assistant, outcome).await;
    }

    /// Generation defaults from settings, overlaid with the chat's own.
    pub(super) fn chat_settings(&self, chat: &Chat) -> ChatSettings {
        let ai = &self.settings().ai;
        ChatSettings {
            temperature: Some(ai.default_temperature),
            max_tokens: Some(ai.default_max_tokens),
            top_p: Some(ai.default_top_p),
            images_count: Some(1),
            system_prompt: Some(ai.default_system_prompt.clone()).filter(|p| !p.trim().is_empty()),
            thinking: None,
            thinking_budget: None,
        }
        .overlay(&chat.settings)
    }

    /// Request carrying the chat's settings and tools. Reasoning options are
    /// dropped for models without reasoning support.
    pub(super) async fn completion_request(
        &self,
        chat: &Chat,
        model: &Model,
        ctx: &RequestContext,
        assistant: &Message,
    ) -> CompletionRequest {
        let settings = self.chat_settings(chat);
        let reasoning = model.has_feature(ModelFeature::Reasoning);

        let server_ids: Vec<McpServerId> = chat
            .tools
            .iter()
            .filter(|t| t.tool_type == ToolType::Mcp)
            .filter_map(|t| t.id.clone())
            .collect();
        let mcp_servers = if server_ids.is_empty() {
            Vec::new()
        } else {
            self.repo().mcp_servers(&server_ids).await.unwrap_or_else(|e| {
                warn!(error = %e, "failed to load MCP servers, continuing without them");
                Vec::new()
            })
        };
        let tools = self
            .inner
            .tools
            .for_request(&chat.tools, &mcp_servers, &ctx.connection)
            .await;
        let hosted_tools = chat
            .tools
            .iter()
            .map(|t| t.tool_type)
            .filter(|t| matches!(t, ToolType::WebSearch | ToolType::CodeInterpreter))
            .collect();
        debug!(tools = tools.len(), mcp_servers = mcp_servers.len(), "request tools resolved");

        CompletionRequest {
            model_id: model.model_id.clone(),
            system_prompt: settings.system_prompt,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
            thinking: settings.thinking.filter(|_| reasoning),
            thinking_budget: settings.thinking_budget.filter(|_| reasoning),
            tools: (!tools.is_empty()).then(|| Arc::new(tools) as Arc<dyn ToolExecutor>),
            mcp_servers,
            hosted_tools,
            trace_id: Some(assistant.id.to_string()),
        }
    }

    /// Drain the provider stream, flushing snapshots at most once per
    /// throttle interval unless an update is forced.
    async fn consume_stream(
        &self,
        chat: &Chat,
        model: &Model,
        ctx: &RequestContext,
        request: CompletionRequest,
        history: Vec<ModelMessage>,
        assistant: &mut Message,
    ) -> Outcome {
        let mut stream = match self.inner.gateway.stream_chat(model, &ctx.connection, request, history) {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let interval = Duration::from_millis(self.settings().streaming.min_update_interval_ms);
        let mut throttle = FlushThrottle::new(interval);
        let mut content = String::new();
        let mut step = 0usize;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ProviderEvent::Start) => {}
                Ok(ProviderEvent::Progress(update)) => {
                    if self.inner.cancellations.is_cancelled(&assistant.id) {
                        debug!("cancellation observed, dropping stream");
                        return Outcome::Cancelled { partial: content };
                    }
                    if update.status == Some(StreamStatus::ContentGeneration) {
                        if !update.token.is_empty() {
                            content.clone_from(&update.token);
                        }
                    } else {
                        content.push_str(&update.token);
                    }
                    if update.status.is_some_and(StreamStatus::is_stepwise) {
                        step += 1;
                    }
                    if throttle.ready(update.force) {
                        self.flush(chat, assistant, &content, update, step).await;
                    }
                }
                Ok(ProviderEvent::Complete(response)) => {
                    return Outcome::Answered {
                        content: response.content,
                        metadata: response.metadata,
                    };
                }
                Err(e) => return Outcome::Failed(e.to_string()),
            }
        }
        if self.inner.cancellations.is_cancelled(&assistant.id) {
            Outcome::Cancelled { partial: content }
        } else {
            Outcome::Failed("Stream ended without a completion event".into())
        }
    }

    /// Persist and broadcast an intermediate snapshot.
    async fn flush(&self, chat: &Chat, assistant: &mut Message, content: &str, update: ProgressUpdate, step: usize) {
        content.clone_into(&mut assistant.content);
        assistant.status = Some(update.status.unwrap_or(StreamStatus::InProgress));
        assistant.status_info = status_info(&update, step);
        assistant.updated_at = Utc::now();
        if !update.tool_calls.is_empty() || !update.tools.is_empty() {
            assistant.metadata_mut().merge_tool_records(update.tool_calls, update.tools);
        } else if update.status == Some(StreamStatus::Started) && update.request_id.is_some() {
            let metadata = assistant.metadata_mut();
            metadata.request_id = update.request_id;
            metadata.last_sequence_number = update.sequence_number;
        }
        if let Err(e) = self.repo().save_message(assistant).await {
            warn!(error = %e, "failed to persist progress");
        }
        self.inner.fanout.publish_chat_message(chat, assistant, true).await;
    }

    /// Apply the terminal transition, title the chat if needed, then persist
    /// and broadcast the final snapshot.
    ///
    /// A turn in the cancellation registry always ends cancelled, whatever
    /// the provider reported.
    pub(super) async fn finish(
        &self,
        chat: &mut Chat,
        model: &Model,
        ctx: &RequestContext,
        question: &str,
        mut assistant: Message,
        outcome: Outcome,
    ) {
        let cancelled =
            matches!(outcome, Outcome::Cancelled { .. }) || self.inner.cancellations.is_cancelled(&assistant.id);
        match outcome {
            Outcome::Answered { content, metadata } => {
                if metadata != MessageMetadata::default() {
                    assistant.metadata_mut().merge_from(metadata);
                }
                let content = content.trim();
                assistant.content = if content.is_empty() { NO_RESPONSE } else { content }.to_owned();
                assistant.status = Some(StreamStatus::Completed);
            }
            Outcome::Cancelled { partial } => assistant.content = partial,
            Outcome::Failed(text) if !cancelled => {
                error!(error = %text, "generation failed");
                assistant.role = MessageRole::Error;
                assistant.content = text;
                assistant.status = Some(StreamStatus::Error);
            }
            Outcome::Failed(text) => debug!(error = %text, "provider error after cancellation"),
        }
        if cancelled {
            assistant.status = Some(StreamStatus::Cancelled);
            if assistant.content.trim().is_empty() {
                CANCELLED.clone_into(&mut assistant.content);
            }
        }
        assistant.status_info = None;
        assistant.updated_at = Utc::now();

        if assistant.role != MessageRole::Error && chat.needs_title() {
            self.ensure_title(chat, model, ctx, question, &assistant.content).await;
        }

        match self.repo().save_message(&assistant).await {
            Ok(()) => {
                info!(status = ?assistant.status, chars = assistant.content.len(), "turn finished");
                self.inner.fanout.publish_chat_message(chat, &assistant, false).await;
            }
            Err(e) => {
                error!(error = %e, "failed to persist final turn");
                self.inner.fanout.publish_chat_error(&chat.id, &e.to_string()).await;
            }
        }
        let _ = self.inner.cancellations.untrack(&assistant.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
