//! # Converse turns
//!
//! `ConverseStream` for streaming and `Converse` for one-shot answers.
//!
//! A tool-use block opens with its ID and name, then streams its input as
//! JSON text deltas until the block stops. When the message stops with
//! `tool_use`, the calls run through the request's
//! [`ToolExecutor`](parley_llm::ToolExecutor), the assistant tool-use message
//! and a user message with the results are appended, and the request is sent
//! again.

use aws_sdk_bedrockruntime::Client;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ContentBlockStart, ConverseOutput, ConverseStreamOutput as StreamEvent, Message,
    ReasoningContentBlockDelta, StopReason, TokenUsage,
};
use parley_core::messages::{MessageMetadata, ModelMessage, Usage};
use parley_core::{ModelResponse, ProgressUpdate, ProviderEvent, StreamStatus, ToolCallRecord};
use parley_llm::tool_parsing::tool_call_record;
use parley_llm::{CompletionRequest, ProviderEventStream, ProviderResult, tool_round};
use tracing::{debug, warn};

use crate::convert::{
    from_document, inference_config, sdk_error, system_blocks, to_messages, tool_config, tool_result_message,
    tool_use_message,
};
use crate::types::PROVIDER_ID;

/// Everything one chat turn needs, owned so it can move into a stream.
#[derive(Clone, Debug)]
pub(crate) struct Turn {
    pub client: Client,
    pub request: CompletionRequest,
    pub history: Vec<ModelMessage>,
    pub max_tool_rounds: u32,
}

/// Tool use assembled from stream deltas.
#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

fn add_usage(total: &mut Option<Usage>, usage: &TokenUsage) {
    let t = total.get_or_insert_with(Usage::default);
    t.input_tokens += u64::try_from(usage.input_tokens()).unwrap_or_default();
    t.output_tokens += u64::try_from(usage.output_tokens()).unwrap_or_default();
}

/// Append one tool round to the conversation.
fn append_round(
    messages: &mut Vec<Message>,
    text: &str,
    calls: &[ToolCallRecord],
    results: &[parley_core::ToolResultRecord],
) -> ProviderResult<()> {
    messages.push(tool_use_message(text, calls)?);
    messages.push(tool_result_message(results)?);
    Ok(())
}

/// Stream one turn, running tool rounds in place.
///
/// `Start` is yielded only after the first request is accepted.
pub(crate) fn stream(turn: Turn) -> ProviderEventStream {
    Box::pin(async_stream::stream! {
        let model = turn.request.model_id.clone();
        let executor = turn.request.tools.clone();
        let definitions = turn.request.tool_definitions();
        let mut messages = match to_messages(&turn.history) {
            Ok(m) => m,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        let mut content = String::new();
        let mut metadata = MessageMetadata::default();
        let mut usage = None;
        let mut round = 0u32;

        loop {
            let tools = match tool_config(&model, &definitions, round) {
                Ok(t) => t,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let sent = turn
                .client
                .converse_stream()
                .model_id(&model)
                .set_messages(Some(messages.clone()))
                .set_system(system_blocks(&model, turn.request.system_prompt.as_deref()))
                .inference_config(inference_config(&model, &turn.request))
                .set_tool_config(tools)
                .send()
                .await;
            let mut output = match sent {
                Ok(o) => o,
                Err(e) => {
                    yield Err(sdk_error(e));
                    return;
                }
            };
            if round == 0 {
                yield Ok(ProviderEvent::Start);
            }

            let mut text = String::new();
            let mut reasoning = String::new();
            let mut pending: Option<PendingToolUse> = None;
            let mut calls: Vec<ToolCallRecord> = Vec::new();
            let mut stop_reason = None;

            loop {
                let event = match output.stream.recv().await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(sdk_error(e));
                        return;
                    }
                };
                match event {
                    StreamEvent::ContentBlockStart(start) => {
                        if let Some(ContentBlockStart::ToolUse(tool)) = start.start() {
                            pending = Some(PendingToolUse {
                                id: tool.tool_use_id().to_owned(),
                                name: tool.name().to_owned(),
                                input: String::new(),
                            });
                        }
                    }
                    StreamEvent::ContentBlockDelta(delta) => match delta.delta() {
                        Some(ContentBlockDelta::Text(token)) if !token.is_empty() => {
                            text.push_str(token);
                            yield Ok(ProviderEvent::Progress(ProgressUpdate::token(token.clone())));
                        }
                        Some(ContentBlockDelta::ReasoningContent(ReasoningContentBlockDelta::Text(part))) => {
                            reasoning.push_str(part);
                            yield Ok(ProviderEvent::Progress(ProgressUpdate {
                                status: Some(StreamStatus::Reasoning),
                                detail: Some(reasoning.clone()),
                                ..ProgressUpdate::default()
                            }));
                        }
                        Some(ContentBlockDelta::ToolUse(tool)) => {
                            if let Some(p) = pending.as_mut() {
                                p.input.push_str(tool.input());
                            }
                        }
                        _ => {}
                    },
                    StreamEvent::ContentBlockStop(_) => {
                        if let Some(p) = pending.take() {
                            calls.push(tool_call_record(p.id, p.name, Some(&p.input), PROVIDER_ID));
                        }
                        reasoning.clear();
                    }
                    StreamEvent::MessageStop(stop) => stop_reason = Some(stop.stop_reason().clone()),
                    StreamEvent::Metadata(meta) => {
                        if let Some(u) = meta.usage() {
                            add_usage(&mut usage, u);
                        }
                    }
                    _ => {}
                }
            }
            content.push_str(&text);

            let wants_tools = stop_reason == Some(StopReason::ToolUse) && !calls.is_empty();
            let Some(executor) = executor.as_ref().filter(|_| wants_tools) else {
                break;
            };
            if round >= turn.max_tool_rounds {
                warn!(provider = PROVIDER_ID, rounds = round, "tool round limit reached, finishing turn");
                break;
            }
            round += 1;

            yield Ok(ProviderEvent::Progress(tool_round::requested(&calls)));
            for call in &calls {
                yield Ok(ProviderEvent::Progress(tool_round::running(executor.as_ref(), call)));
            }
            let results = tool_round::execute_all(executor.as_ref(), &calls).await;
            yield Ok(ProviderEvent::Progress(tool_round::completed(&results)));

            if let Err(e) = append_round(&mut messages, &text, &calls, &results) {
                yield Err(e);
                return;
            }
            metadata.merge_tool_records(calls, results);
            debug!(provider = PROVIDER_ID, round, "re-issuing request with tool results");
        }

        metadata.usage = usage;
        yield Ok(ProviderEvent::Complete(ModelResponse { content, metadata }));
    })
}

/// Single non-streaming answer, running tool rounds in place.
pub(crate) async fn complete(turn: &Turn) -> ProviderResult<ModelResponse> {
    let model = &turn.request.model_id;
    let definitions = turn.request.tool_definitions();
    let mut messages = to_messages(&turn.history)?;
    let mut content = String::new();
    let mut metadata = MessageMetadata::default();
    let mut usage = None;
    let mut round = 0u32;

    loop {
        let output = turn
            .client
            .converse()
            .model_id(model)
            .set_messages(Some(messages.clone()))
            .set_system(system_blocks(model, turn.request.system_prompt.as_deref()))
            .inference_config(inference_config(model, &turn.request))
            .set_tool_config(tool_config(model, &definitions, round)?)
            .send()
            .await
            .map_err(sdk_error)?;
        if let Some(u) = output.usage() {
            add_usage(&mut usage, u);
        }

        let mut text = String::new();
        let mut calls = Vec::new();
        if let Some(ConverseOutput::Message(message)) = output.output() {
            for block in message.content() {
                match block {
                    ContentBlock::Text(t) => text.push_str(t),
                    ContentBlock::ToolUse(tool) => {
                        let input = from_document(tool.input()).to_string();
                        calls.push(tool_call_record(tool.tool_use_id(), tool.name(), Some(&input), PROVIDER_ID));
                    }
                    _ => {}
                }
            }
        }
        content.push_str(&text);

        let wants_tools = *output.stop_reason() == StopReason::ToolUse && !calls.is_empty();
        let Some(executor) = turn.request.tools.as_ref().filter(|_| wants_tools) else {
            break;
        };
        if round >= turn.max_tool_rounds {
            warn!(provider = PROVIDER_ID, rounds = round, "tool round limit reached, finishing turn");
            break;
        }
        round += 1;

        let results = tool_round::execute_all(executor.as_ref(), &calls).await;
        append_round(&mut messages, &text, &calls, &results)?;
        metadata.merge_tool_records(calls, results);
    }

    metadata.usage = usage;
    Ok(ModelResponse { content, metadata })
}
