//! # Responses flavor
//!
//! `POST /responses` with `stream: true` and `background: true`. The job ID
//! from `response.created` is reported right away in a forced `started`
//! progress so the turn can be cancelled with `POST /responses/{id}/cancel`.
//!
//! Event mapping:
//! - `response.output_text.delta` → token
//! - `response.web_search_call.*` → `web_search` (once per phase change)
//! - `response.code_interpreter_call*` → `code_interpreter`; the finished
//!   code is reported as a `code_interpreter` tool result
//! - `response.output_item.done` → status from the item type, with the
//!   sequence number and the search query as detail
//! - `response.completed` / `response.incomplete` → final content and usage
//! - `response.failed` / `error` → stream error
//!
//! Function calls found in the final output run through the request's
//! executor. Their results are sent as `function_call_output` items on a
//! follow-up request chained with `previous_response_id`.

use futures::StreamExt;
use parley_core::messages::{MessageMetadata, Usage};
use parley_core::{ModelResponse, ProgressUpdate, ProviderEvent, StreamStatus, ToolCallRecord, ToolResultRecord};
use parley_llm::retry::retry_rate_limited;
use parley_llm::sse::{parse_sse_data, sse_events};
use parley_llm::tool_parsing::tool_call_record;
use parley_llm::{ProviderError, ProviderEventStream, ProviderResult, tool_round};
use tracing::{debug, trace, warn};

use crate::client::OpenAiClient;
use crate::message_converter::{responses_temperature, to_responses_input, to_responses_tools};
use crate::protocol::Turn;
use crate::types::{
    NO_RESPONSE, ResponsesEventType, ResponsesInputItem, ResponsesOutputItem, ResponsesRequest,
    ResponsesResponse, ResponsesStreamEvent,
};

const PATH: &str = "responses";

fn build_request(
    turn: &Turn,
    input: Vec<ResponsesInputItem>,
    previous_response_id: Option<String>,
    stream: bool,
) -> ResponsesRequest {
    let request = &turn.request;
    ResponsesRequest {
        model: turn.model.clone(),
        input,
        instructions: request.system_prompt.clone().filter(|p| !p.trim().is_empty()),
        stream,
        background: stream.then_some(true),
        previous_response_id,
        temperature: responses_temperature(&turn.model, request.temperature),
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        tools: to_responses_tools(&request.hosted_tools, &request.tool_definitions()),
        reasoning: None,
    }
}

/// Text, usage and function calls of a finished response.
#[derive(Debug, Default)]
pub(crate) struct ParsedOutput {
    pub content: String,
    pub usage: Option<Usage>,
    pub calls: Vec<ToolCallRecord>,
}

/// Join message text (or refusals) and collect function calls.
pub(crate) fn parse_output(response: &ResponsesResponse, provider: &str) -> ParsedOutput {
    let mut texts = Vec::new();
    let mut calls = Vec::new();
    for item in &response.output {
        match item.item_type.as_str() {
            "message" => texts.extend(
                item.content
                    .iter()
                    .filter_map(|c| c.text.as_deref().or(c.refusal.as_deref()))
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned),
            ),
            "function_call" => {
                let call_id = item.call_id.clone().or_else(|| item.id.clone()).unwrap_or_default();
                let name = item.name.clone().unwrap_or_default();
                calls.push(tool_call_record(call_id, name, item.arguments.as_deref(), provider));
            }
            _ => {}
        }
    }
    ParsedOutput {
        content: texts.join("\n\n"),
        usage: response.usage.map(Usage::from),
        calls,
    }
}

/// Status for a finished output item, if it is worth showing.
fn item_status(item: &ResponsesOutputItem) -> Option<StreamStatus> {
    match item.item_type.as_str() {
        "web_search_call" => Some(StreamStatus::WebSearch),
        "code_interpreter_call" => Some(StreamStatus::CodeInterpreter),
        "function_call" => Some(StreamStatus::ToolCall),
        "reasoning" if !item.summary.is_empty() || !item.content.is_empty() => Some(StreamStatus::Reasoning),
        _ => None,
    }
}

fn item_detail(item: &ResponsesOutputItem) -> Option<String> {
    item.action
        .as_ref()
        .and_then(|a| a.get("query"))
        .and_then(|q| q.as_str())
        .map(str::to_owned)
}

fn status_update(status: StreamStatus) -> ProgressUpdate {
    ProgressUpdate {
        status: Some(status),
        ..ProgressUpdate::default()
    }
}

fn failure(event: &ResponsesStreamEvent) -> ProviderError {
    let message = event
        .response
        .as_ref()
        .and_then(|r| r.error.as_ref())
        .map(|e| e.message.clone())
        .or_else(|| event.message.clone())
        .unwrap_or_else(|| "Response failed".into());
    ProviderError::other(message)
}

/// Per-request event state.
#[derive(Default)]
struct EventState {
    last_status: Option<StreamStatus>,
    finished: Option<ResponsesResponse>,
}

impl EventState {
    /// Map one event to progress updates. `Err` ends the stream.
    fn handle(&mut self, event: ResponsesStreamEvent) -> Result<Vec<ProgressUpdate>, ProviderError> {
        let mut out = Vec::new();
        match event.event_type {
            ResponsesEventType::Created => {
                if let Some(id) = event.response.as_ref().map(|r| r.id.clone()).filter(|id| !id.is_empty()) {
                    out.push(ProgressUpdate {
                        request_id: Some(id),
                        sequence_number: event.sequence_number,
                        ..ProgressUpdate::forced_status(StreamStatus::Started)
                    });
                }
            }
            ResponsesEventType::OutputTextDelta => {
                if let Some(delta) = event.delta.filter(|d| !d.is_empty()) {
                    out.push(ProgressUpdate::token(delta));
                }
            }
            ResponsesEventType::WebSearch => self.phase(StreamStatus::WebSearch, &mut out),
            ResponsesEventType::CodeInterpreterInProgress => self.phase(StreamStatus::CodeInterpreter, &mut out),
            ResponsesEventType::CodeInterpreterInterpreting | ResponsesEventType::CodeInterpreterCodeDelta => {
                self.last_status = Some(StreamStatus::CodeInterpreter);
                out.push(status_update(StreamStatus::CodeInterpreter));
            }
            ResponsesEventType::CodeInterpreterCodeDone => {
                debug!(item_id = ?event.item_id, "code interpreter call completed");
                out.push(ProgressUpdate {
                    tools: vec![ToolResultRecord::ok(
                        event.item_id.unwrap_or_default(),
                        "code_interpreter",
                        event.code.unwrap_or_default(),
                    )],
                    ..status_update(StreamStatus::CodeInterpreter)
                });
            }
            ResponsesEventType::OutputItemDone => {
                if let Some((item, status)) = event.item.as_ref().and_then(|i| item_status(i).map(|s| (i, s))) {
                    self.last_status = Some(status);
                    out.push(ProgressUpdate {
                        sequence_number: event.sequence_number,
                        detail: item_detail(item),
                        ..status_update(status)
                    });
                }
            }
            ResponsesEventType::Completed => {
                self.finished = Some(event.response.unwrap_or_default());
            }
            ResponsesEventType::Failed | ResponsesEventType::Error => return Err(failure(&event)),
            ResponsesEventType::Other => trace!("unhandled responses event"),
        }
        Ok(out)
    }

    fn phase(&mut self, status: StreamStatus, out: &mut Vec<ProgressUpdate>) {
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            out.push(status_update(status));
        }
    }
}

fn add_usage(total: &mut Option<Usage>, more: Option<Usage>) {
    if let Some(more) = more {
        let t = total.get_or_insert_with(Usage::default);
        t.input_tokens += more.input_tokens;
        t.output_tokens += more.output_tokens;
    }
}

fn outputs_for(results: &[ToolResultRecord]) -> Vec<ResponsesInputItem> {
    results
        .iter()
        .map(|r| ResponsesInputItem::FunctionCallOutput {
            call_id: r.call_id.clone(),
            output: r.content.clone(),
        })
        .collect()
}

/// Stream one turn as a background job.
pub(crate) fn stream(turn: Turn) -> ProviderEventStream {
    Box::pin(async_stream::stream! {
        let provider = turn.provider;
        let config = turn.client.config().clone();
        let executor = turn.request.tools.clone();
        let mut input = to_responses_input(&turn.history, provider);
        let mut previous_response_id = None;
        let mut contents: Vec<String> = Vec::new();
        let mut metadata = MessageMetadata::default();
        let mut usage = None;
        let mut round = 0u32;

        loop {
            let body = build_request(&turn, std::mem::take(&mut input), previous_response_id.take(), true);
            let response = if round == 0 {
                turn.client.post_stream(PATH, &body).await
            } else {
                retry_rate_limited(provider, &config.rate_limit, || turn.client.post_stream(PATH, &body)).await
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if round == 0 {
                yield Ok(ProviderEvent::Start);
            }

            let mut events = Box::pin(sse_events(response.bytes_stream(), config.idle_timeout));
            let mut state = EventState::default();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let Some(parsed) = parse_sse_data::<ResponsesStreamEvent>(&event.data, provider) else {
                    continue;
                };
                match state.handle(parsed) {
                    Ok(updates) => {
                        for update in updates {
                            if update.status == Some(StreamStatus::Started) {
                                metadata.request_id.clone_from(&update.request_id);
                                metadata.last_sequence_number = update.sequence_number;
                            }
                            yield Ok(ProviderEvent::Progress(update));
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
                if state.finished.is_some() {
                    break;
                }
            }

            let Some(finished) = state.finished else {
                yield Err(ProviderError::other("Stream ended unexpectedly"));
                return;
            };
            let parsed = parse_output(&finished, provider);
            add_usage(&mut usage, parsed.usage);
            if !parsed.content.is_empty() {
                contents.push(parsed.content);
            }

            let Some(executor) = executor.as_ref().filter(|_| !parsed.calls.is_empty()) else {
                break;
            };
            if round >= config.max_tool_rounds {
                warn!(provider, rounds = round, "tool round limit reached, finishing turn");
                break;
            }
            round += 1;

            yield Ok(ProviderEvent::Progress(tool_round::requested(&parsed.calls)));
            for call in &parsed.calls {
                yield Ok(ProviderEvent::Progress(tool_round::running(executor.as_ref(), call)));
            }
            let results = tool_round::execute_all(executor.as_ref(), &parsed.calls).await;
            yield Ok(ProviderEvent::Progress(tool_round::completed(&results)));

            input = outputs_for(&results);
            previous_response_id = Some(finished.id);
            metadata.merge_tool_records(parsed.calls, results);
        }

        let content = if contents.is_empty() { NO_RESPONSE.to_owned() } else { contents.join("\n\n") };
        metadata.usage = usage;
        yield Ok(ProviderEvent::Complete(ModelResponse { content, metadata }));
    })
}

/// Single foreground answer, running tool rounds in place.
pub(crate) async fn complete(turn: &Turn) -> ProviderResult<ModelResponse> {
    let config = turn.client.config();
    let mut input = to_responses_input(&turn.history, turn.provider);
    let mut previous_response_id = None;
    let mut contents = Vec::new();
    let mut metadata = MessageMetadata::default();
    let mut usage = None;
    let mut round = 0u32;

    loop {
        let body = build_request(turn, std::mem::take(&mut input), previous_response_id.take(), false);
        let reply: ResponsesResponse =
            retry_rate_limited(turn.provider, &config.rate_limit, || turn.client.post_json(PATH, &body)).await?;
        let parsed = parse_output(&reply, turn.provider);
        add_usage(&mut usage, parsed.usage);
        if !parsed.content.is_empty() {
            contents.push(parsed.content);
        }

        let Some(executor) = turn.request.tools.as_ref().filter(|_| !parsed.calls.is_empty()) else {
            break;
        };
        if round >= config.max_tool_rounds {
            warn!(provider = turn.provider, rounds = round, "tool round limit reached, finishing turn");
            break;
        }
        round += 1;

        let results = tool_round::execute_all(executor.as_ref(), &parsed.calls).await;
        input = outputs_for(&results);
        previous_response_id = Some(reply.id);
        metadata.merge_tool_records(parsed.calls, results);
    }

    let content = if contents.is_empty() { NO_RESPONSE.to_owned() } else { contents.join("\n\n") };
    metadata.usage = usage;
    Ok(ModelResponse { content, metadata })
}

/// Cancel a background job.
pub(crate) async fn cancel(client: &OpenAiClient, response_id: &str) -> ProviderResult<()> {
    let path = format!("{PATH}/{response_id}/cancel");
    let _: serde_json::Value = client.post_json(&path, &serde_json::json!({})).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use parley_core::ToolType;
    use parley_core::messages::{MessageRole, ModelMessage};
    use parley_llm::CompletionRequest;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::OpenAiClient;
    use parley_llm::tool_round::test_support::EchoTools;
    use crate::types::OpenAiConfig;

    fn sse(events: &[serde_json::Value]) -> String {
        events
            .iter()
            .map(|e| format!("event: {}\ndata: {e}\n\n", e["type"].as_str().unwrap_or("message")))
            .collect()
    }

    fn client(server: &MockServer) -> Arc<OpenAiClient> {
        Arc::new(OpenAiClient::new(OpenAiConfig::new(server.uri(), SecretString::from("sk-test"))).unwrap())
    }

    fn turn(server: &MockServer, request: CompletionRequest) -> Turn {
        Turn {
            client: client(server),
            provider: "OPEN_AI",
            model: request.model_id.clone(),
            request,
            history: vec![ModelMessage::new(MessageRole::User, "What's new in Rust?")],
        }
    }

    fn completed(id: &str, text: &str) -> serde_json::Value {
        json!({
            "type": "response.completed",
            "response": {
                "id": id,
                "status": "completed",
                "output": [{"type": "message", "content": [{"type": "output_text", "text": text}]}],
                "usage": {"input_tokens": 12, "output_tokens": 5}
            }
        })
    }

    fn progress(events: &[ProviderResult<ProviderEvent>]) -> Vec<&ProgressUpdate> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(ProviderEvent::Progress(p)) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn reports_job_id_and_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    json!({"type": "response.created", "sequence_number": 0, "response": {"id": "resp_1", "status": "queued"}}),
                    json!({"type": "response.web_search_call.in_progress", "sequence_number": 1}),
                    json!({"type": "response.web_search_call.searching", "sequence_number": 2}),
                    json!({"type": "response.output_item.done", "sequence_number": 3,
                           "item": {"type": "web_search_call", "action": {"query": "rust 1.85"}}}),
                    json!({"type": "response.output_text.delta", "delta": "Edition 2024"}),
                    completed("resp_1", "Edition 2024"),
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let request = CompletionRequest {
            hosted_tools: vec![ToolType::WebSearch],
            ..CompletionRequest::new("gpt-4.1")
        };
        let events: Vec<_> = stream(turn(&server, request)).collect().await;
        assert_matches!(events[0], Ok(ProviderEvent::Start));

        let updates = progress(&events);
        assert_eq!(updates[0].status, Some(StreamStatus::Started));
        assert_eq!(updates[0].request_id.as_deref(), Some("resp_1"));
        assert!(updates[0].force);
        // two search phase events collapse into one status
        assert_eq!(updates[1].status, Some(StreamStatus::WebSearch));
        assert_eq!(updates[2].detail.as_deref(), Some("rust 1.85"));
        assert_eq!(updates[2].sequence_number, Some(3));
        assert_eq!(updates[3].token, "Edition 2024");

        let Some(Ok(ProviderEvent::Complete(done))) = events.last() else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(done.content, "Edition 2024");
        assert_eq!(done.metadata.request_id.as_deref(), Some("resp_1"));
        assert_eq!(done.metadata.usage.unwrap().output_tokens, 5);

        let sent: serde_json::Value = server.received_requests().await.unwrap()[0].body_json().unwrap();
        assert_eq!(sent["background"], true);
        assert_eq!(sent["tools"][0]["type"], "web_search");
    }

    #[tokio::test]
    async fn empty_output_is_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[json!({"type": "response.incomplete", "response": {"id": "resp_2", "output": []}})]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        let events: Vec<_> = stream(turn(&server, CompletionRequest::new("o4-mini"))).collect().await;
        assert_matches!(events.last(), Some(Ok(ProviderEvent::Complete(r))) if r.content == NO_RESPONSE);
    }

    #[tokio::test]
    async fn failed_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[json!({"type": "response.failed",
                             "response": {"id": "r", "error": {"code": "server_error", "message": "model crashed"}}})]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        let events: Vec<_> = stream(turn(&server, CompletionRequest::new("gpt-4.1"))).collect().await;
        assert_matches!(events.last(), Some(Err(e)) if e.to_string() == "model crashed");
    }

    #[tokio::test]
    async fn function_calls_chain_previous_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(body_string_contains("previous_response_id"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[completed("resp_b", "Rust 1.85 shipped")]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[json!({"type": "response.completed", "response": {
                    "id": "resp_a",
                    "output": [{"type": "function_call", "call_id": "fc_1", "name": "web_search",
                                "arguments": "{\"query\":\"rust\"}"}]
                }})]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let tools = Arc::new(EchoTools::default());
        let request = CompletionRequest {
            tools: Some(tools.clone()),
            ..CompletionRequest::new("gpt-4.1")
        };
        let events: Vec<_> = stream(turn(&server, request)).collect().await;
        let statuses: Vec<_> = progress(&events).iter().filter_map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![StreamStatus::ToolCall, StreamStatus::WebSearch, StreamStatus::ToolCallCompleted]
        );
        let Some(Ok(ProviderEvent::Complete(done))) = events.last() else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(done.content, "Rust 1.85 shipped");
        assert_eq!(done.metadata.tools[0].call_id, "fc_1");

        let requests = server.received_requests().await.unwrap();
        let second: serde_json::Value = requests[1].body_json().unwrap();
        assert_eq!(second["previous_response_id"], "resp_a");
        assert_eq!(second["input"][0]["type"], "function_call_output");
        assert_eq!(second["input"][0]["output"], "web_search:rust");
    }

    #[tokio::test]
    async fn cancel_posts_to_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses/resp_9/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "resp_9", "status": "cancelled"})))
            .expect(1)
            .mount(&server)
            .await;
        cancel(&client(&server), "resp_9").await.unwrap();
    }

    #[test]
    fn parse_output_joins_messages_and_refusals() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "r",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "First"}]},
                {"type": "message", "content": [{"type": "refusal", "refusal": "Second"}]}
            ]
        }))
        .unwrap();
        let parsed = parse_output(&response, "test");
        assert_eq!(parsed.content, "First\n\nSecond");
        assert!(parsed.calls.is_empty());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn empty_reasoning_item_has_no_status() {
        let item = ResponsesOutputItem {
            item_type: "reasoning".into(),
            ..ResponsesOutputItem::default()
        };
        assert!(item_status(&item).is_none());
        let item = ResponsesOutputItem {
            item_type: "reasoning".into(),
            summary: vec![json!({"type": "summary_text", "text": "thinking"})],
            ..ResponsesOutputItem::default()
        };
        assert_eq!(item_status(&item), Some(StreamStatus::Reasoning));
    }
}
