//! Scripted adapter for tests.
//!
//! Responses are queued up front and consumed in order. Every call is
//! recorded so tests can assert on the request and history an adapter saw.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::messages::ModelMessage;
use parley_core::{Model, ModelResponse, ProgressUpdate, ProviderEvent};

use crate::provider::{
    CompletionRequest, ProviderAdapter, ProviderError, ProviderEventStream, ProviderInfo,
    ProviderResult,
};

/// A recorded adapter call.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// The request.
    pub request: CompletionRequest,
    /// The history.
    pub history: Vec<ModelMessage>,
    /// Whether the call went through `stream_chat`.
    pub streaming: bool,
}

/// Scripted [`ProviderAdapter`].
pub struct MockAdapter {
    provider_id: String,
    streams: Mutex<VecDeque<Vec<ProviderResult<ProviderEvent>>>>,
    completions: Mutex<VecDeque<ProviderResult<ModelResponse>>>,
    default_completion: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
    stopped: Mutex<Vec<String>>,
    event_delay: Option<Duration>,
    completion_delay: Option<Duration>,
    cancellable: bool,
    models: HashMap<String, Model>,
}

impl MockAdapter {
    /// Empty script for the given provider ID.
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            streams: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            default_completion: None,
            calls: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            event_delay: None,
            completion_delay: None,
            cancellable: false,
            models: HashMap::new(),
        }
    }

    /// Sleep before each streamed event.
    #[must_use]
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Sleep before each `complete_chat` answer.
    #[must_use]
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = Some(delay);
        self
    }

    /// Report cancellation support and accept `stop_request`.
    #[must_use]
    pub fn with_cancellation(mut self) -> Self {
        self.cancellable = true;
        self
    }

    /// Answer for `complete_chat` once the queue is empty.
    #[must_use]
    pub fn with_default_completion(mut self, text: impl Into<String>) -> Self {
        self.default_completion = Some(text.into());
        self
    }

    /// Catalog returned by `models`.
    #[must_use]
    pub fn with_models(mut self, models: impl IntoIterator<Item = Model>) -> Self {
        self.models = models.into_iter().map(|m| (m.model_id.clone(), m)).collect();
        self
    }

    /// Queue a raw stream script.
    pub fn push_stream(&self, events: Vec<ProviderResult<ProviderEvent>>) {
        self.streams.lock().push_back(events);
    }

    /// Queue a stream of tokens followed by a completion of their concatenation.
    pub fn push_tokens(&self, tokens: &[&str]) {
        let mut events = vec![Ok(ProviderEvent::Start)];
        events.extend(
            tokens
                .iter()
                .map(|t| Ok(ProviderEvent::Progress(ProgressUpdate::token(*t)))),
        );
        events.push(Ok(ProviderEvent::Complete(ModelResponse::text(tokens.concat()))));
        self.push_stream(events);
    }

    /// Queue a `complete_chat` answer.
    pub fn push_completion(&self, result: ProviderResult<ModelResponse>) {
        self.completions.lock().push_back(result);
    }

    /// Calls seen so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Request IDs passed to `stop_request`.
    pub fn stopped_requests(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    fn record(&self, request: &CompletionRequest, history: &[ModelMessage], streaming: bool) {
        self.calls.lock().push(RecordedCall {
            request: request.clone(),
            history: history.to_vec(),
            streaming,
        });
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        history: &[ModelMessage],
    ) -> ProviderResult<ModelResponse> {
        self.record(request, history, false);
        if let Some(delay) = self.completion_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.completions.lock().pop_front();
        match (next, &self.default_completion) {
            (Some(result), _) => result,
            (None, Some(text)) => Ok(ModelResponse::text(text.clone())),
            (None, None) => Err(ProviderError::other("no scripted completion")),
        }
    }

    fn stream_chat(&self, request: CompletionRequest, history: Vec<ModelMessage>) -> ProviderEventStream {
        self.record(&request, &history, true);
        let script = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![Err(ProviderError::other("no scripted stream"))]);
        let delay = self.event_delay;
        Box::pin(async_stream::stream! {
            for item in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield item;
            }
        })
    }

    async fn models(&self) -> ProviderResult<HashMap<String, Model>> {
        Ok(self.models.clone())
    }

    async fn stop_request(&self, request_id: &str) -> ProviderResult<()> {
        if !self.cancellable {
            return Err(ProviderError::unsupported("stop_request"));
        }
        self.stopped.lock().push(request_id.to_owned());
        Ok(())
    }

    fn supports_cancellation(&self) -> bool {
        self.cancellable
    }

    async fn info(&self, _test_connection: bool) -> ProviderResult<ProviderInfo> {
        Ok(ProviderInfo {
            id: self.provider_id.clone(),
            name: format!("Mock {}", self.provider_id),
            is_connected: true,
            ..ProviderInfo::default()
        })
    }
}
