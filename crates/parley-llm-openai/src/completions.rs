//! # Chat completions flavor
//!
//! `POST /chat/completions` with `stream: true` and usage reporting.
//!
//! Tool calls stream as deltas keyed by `index`: the first delta for an index
//! carries the call ID and name, later ones append argument text. When a
//! choice finishes with `tool_calls`, the calls run through the request's
//! [`ToolExecutor`](parley_llm::ToolExecutor), the assistant call message and
//! one `tool` message per result are appended, and the request is sent again.

use std::collections::BTreeMap;

use futures::StreamExt;
use parley_core::messages::{MessageMetadata, Usage};
use parley_core::{ModelResponse, ProgressUpdate, ProviderEvent, ToolCallRecord};
use parley_llm::retry::retry_rate_limited;
use parley_llm::sse::{parse_sse_data, sse_events};
use parley_llm::tool_parsing::tool_call_record;
use parley_llm::{ProviderEventStream, ProviderResult, tool_round};
use tracing::{debug, warn};

use crate::message_converter::{completions_temperature, to_chat_messages, to_chat_tools};
use crate::protocol::Turn;
use crate::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatToolCall,
    FunctionCall, StreamOptions, ToolCallDelta,
};

const PATH: &str = "chat/completions";

/// Tool call assembled from streamed deltas.
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn absorb(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id.filter(|s| !s.is_empty()) {
            self.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name.filter(|s| !s.is_empty()) {
                self.name = name;
            }
            if let Some(args) = function.arguments {
                self.arguments.push_str(&args);
            }
        }
    }

    fn into_wire(self) -> ChatToolCall {
        ChatToolCall {
            id: self.id,
            call_type: "function".into(),
            function: FunctionCall {
                name: self.name,
                arguments: self.arguments,
            },
        }
    }
}

fn build_request(turn: &Turn, messages: &[ChatMessage], stream: bool) -> ChatCompletionRequest {
    let request = &turn.request;
    ChatCompletionRequest {
        model: turn.model.clone(),
        messages: messages.to_vec(),
        stream,
        stream_options: stream.then_some(StreamOptions { include_usage: true }),
        temperature: completions_temperature(&turn.model, request.temperature),
        top_p: request.top_p,
        max_completion_tokens: request.max_tokens,
        tools: to_chat_tools(&request.tool_definitions()),
    }
}

fn add_usage(total: &mut Option<Usage>, more: Usage) {
    let t = total.get_or_insert_with(Usage::default);
    t.input_tokens += more.input_tokens;
    t.output_tokens += more.output_tokens;
}

fn records_for(calls: &[ChatToolCall], provider: &str) -> Vec<ToolCallRecord> {
    calls
        .iter()
        .map(|c| tool_call_record(&c.id, &c.function.name, Some(&c.function.arguments), provider))
        .collect()
}

fn append_round(messages: &mut Vec<ChatMessage>, calls: Vec<ChatToolCall>, results: &[parley_core::ToolResultRecord]) {
    messages.push(ChatMessage {
        role: "assistant".into(),
        content: None,
        tool_calls: Some(calls),
        tool_call_id: None,
    });
    messages.extend(
        results
            .iter()
            .map(|r| ChatMessage::tool_result(&r.call_id, &r.content)),
    );
}

/// Stream one turn, running tool rounds in place.
///
/// `Start` is yielded only after the first request is accepted, so a
/// rejected first request surfaces as the first item and can be retried.
pub(crate) fn stream(turn: Turn) -> ProviderEventStream {
    Box::pin(async_stream::stream! {
        let provider = turn.provider;
        let config = turn.client.config().clone();
        let executor = turn.request.tools.clone();
        let mut messages = to_chat_messages(
            &turn.model,
            turn.request.system_prompt.as_deref(),
            &turn.history,
            provider,
        );
        let mut content = String::new();
        let mut metadata = MessageMetadata::default();
        let mut usage = None;
        let mut round = 0u32;

        loop {
            let body = build_request(&turn, &messages, true);
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
            let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();
            let mut wants_tools = false;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let Some(chunk) = parse_sse_data::<ChatCompletionChunk>(&event.data, provider) else {
                    continue;
                };
                if let Some(u) = chunk.usage {
                    add_usage(&mut usage, u.into());
                }
                for choice in chunk.choices {
                    let delta = choice.delta;
                    if let Some(token) = delta.content.or(delta.reasoning_content).filter(|t| !t.is_empty()) {
                        content.push_str(&token);
                        yield Ok(ProviderEvent::Progress(ProgressUpdate::token(token)));
                    }
                    for call in delta.tool_calls.unwrap_or_default() {
                        pending.entry(call.index).or_default().absorb(call);
                    }
                    if choice.finish_reason.as_deref() == Some("tool_calls") {
                        wants_tools = true;
                    }
                }
            }

            let Some(executor) = executor.as_ref().filter(|_| wants_tools && !pending.is_empty()) else {
                break;
            };
            if round >= config.max_tool_rounds {
                warn!(provider, rounds = round, "tool round limit reached, finishing turn");
                break;
            }
            round += 1;

            let calls: Vec<ChatToolCall> = pending.into_values().map(PendingCall::into_wire).collect();
            let records = records_for(&calls, provider);
            yield Ok(ProviderEvent::Progress(tool_round::requested(&records)));
            for record in &records {
                yield Ok(ProviderEvent::Progress(tool_round::running(executor.as_ref(), record)));
            }
            let results = tool_round::execute_all(executor.as_ref(), &records).await;
            yield Ok(ProviderEvent::Progress(tool_round::completed(&results)));

            append_round(&mut messages, calls, &results);
            metadata.merge_tool_records(records, results);
            debug!(provider, round, "re-issuing request with tool results");
        }

        metadata.usage = usage;
        yield Ok(ProviderEvent::Complete(ModelResponse { content, metadata }));
    })
}

/// Single non-streaming answer, running tool rounds in place.
pub(crate) async fn complete(turn: &Turn) -> ProviderResult<ModelResponse> {
    let config = turn.client.config();
    let mut messages = to_chat_messages(
        &turn.model,
        turn.request.system_prompt.as_deref(),
        &turn.history,
        turn.provider,
    );
    let mut content = String::new();
    let mut metadata = MessageMetadata::default();
    let mut usage = None;
    let mut round = 0u32;

    loop {
        let body = build_request(turn, &messages, false);
        let reply: ChatCompletionResponse =
            retry_rate_limited(turn.provider, &config.rate_limit, || turn.client.post_json(PATH, &body)).await?;
        if let Some(u) = reply.usage {
            add_usage(&mut usage, u.into());
        }
        let message = reply.choices.into_iter().next().unwrap_or_default().message;
        if let Some(text) = message.content.or(message.refusal) {
            content.push_str(&text);
        }

        let calls = message.tool_calls.unwrap_or_default();
        let Some(executor) = turn.request.tools.as_ref().filter(|_| !calls.is_empty()) else {
            break;
        };
        if round >= config.max_tool_rounds {
            warn!(provider = turn.provider, rounds = round, "tool round limit reached, finishing turn");
            break;
        }
        round += 1;

        let records = records_for(&calls, turn.provider);
        let results = tool_round::execute_all(executor.as_ref(), &records).await;
        append_round(&mut messages, calls, &results);
        metadata.merge_tool_records(records, results);
    }

    metadata.usage = usage;
    Ok(ModelResponse { content, metadata })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use parley_core::messages::{MessageRole, ModelMessage};
    use parley_core::StreamStatus;
    use parley_llm::{CompletionRequest, ProviderError};
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::OpenAiClient;
    use parley_llm::tool_round::test_support::EchoTools;
    use crate::types::OpenAiConfig;

    fn sse(chunks: &[serde_json::Value]) -> String {
        let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn turn(server: &MockServer, request: CompletionRequest) -> Turn {
        let client = OpenAiClient::new(OpenAiConfig::new(server.uri(), SecretString::from("sk-test"))).unwrap();
        Turn {
            client: Arc::new(client),
            provider: "OPEN_AI",
            model: request.model_id.clone(),
            request,
            history: vec![ModelMessage::new(MessageRole::User, "2+2=")],
        }
    }

    async fn collect(stream: ProviderEventStream) -> Vec<ProviderResult<ProviderEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_tokens_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    serde_json::json!({"choices": [{"delta": {"content": "4"}}]}),
                    serde_json::json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
                    serde_json::json!({"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 1}}),
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let events = collect(stream(turn(&server, CompletionRequest::new("gpt-4o")))).await;
        assert_matches!(events[0], Ok(ProviderEvent::Start));
        assert_matches!(&events[1], Ok(ProviderEvent::Progress(p)) if p.token == "4");
        let Some(Ok(ProviderEvent::Complete(done))) = events.last() else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(done.content, "4");
        assert_eq!(done.metadata.usage.unwrap().input_tokens, 9);

        let sent: serde_json::Value = server.received_requests().await.unwrap()[0].body_json().unwrap();
        assert_eq!(sent["stream_options"]["include_usage"], true);
        assert!(sent.get("temperature").is_none());
    }

    #[tokio::test]
    async fn tool_round_reissues_with_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("tool_call_id"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[serde_json::json!({"choices": [{"delta": {"content": "Found it"}, "finish_reason": "stop"}]})]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    serde_json::json!({"choices": [{"delta": {"tool_calls": [
                        {"index": 0, "id": "call_1", "function": {"name": "web_search", "arguments": "{\"que"}}
                    ]}}]}),
                    serde_json::json!({"choices": [{"delta": {"tool_calls": [
                        {"index": 0, "function": {"arguments": "ry\":\"rust\"}"}}
                    ]}, "finish_reason": "tool_calls"}]}),
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let tools = Arc::new(EchoTools::default());
        let request = CompletionRequest {
            tools: Some(tools.clone()),
            ..CompletionRequest::new("gpt-4.1")
        };
        let events = collect(stream(turn(&server, request))).await;

        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Ok(ProviderEvent::Progress(p)) => p.status,
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![StreamStatus::ToolCall, StreamStatus::WebSearch, StreamStatus::ToolCallCompleted]
        );
        assert_eq!(tools.seen.lock()[0].arguments["query"], "rust");

        let Some(Ok(ProviderEvent::Complete(done))) = events.last() else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(done.content, "Found it");
        assert_eq!(done.metadata.tool_calls.len(), 1);
        assert_eq!(done.metadata.tools[0].content, "web_search:rust");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let second: serde_json::Value = requests[1].body_json().unwrap();
        let msgs = second["messages"].as_array().unwrap();
        assert_eq!(msgs[1]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"rust\"}");
        assert_eq!(msgs[2]["role"], "tool");
        assert_eq!(msgs[2]["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn rejected_request_is_first_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;
        let events = collect(stream(turn(&server, CompletionRequest::new("gpt-4o")))).await;
        assert_eq!(events.len(), 1);
        assert_matches!(events[0], Err(ProviderError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn complete_runs_without_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Arithmetic"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 20, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;
        let response = complete(&turn(&server, CompletionRequest::new("gpt-4o-mini"))).await.unwrap();
        assert_eq!(response.content, "Arithmetic");
        assert_eq!(response.metadata.usage.unwrap().output_tokens, 2);
        let sent: serde_json::Value = server.received_requests().await.unwrap()[0].body_json().unwrap();
        assert_eq!(sent["stream"], false);
    }
}
