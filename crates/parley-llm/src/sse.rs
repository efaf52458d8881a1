//! # SSE decoding
//!
//! Every streaming backend speaks HTTP Server-Sent Events. Framing is done by
//! `eventsource-stream`; this module adds what the adapters share on top:
//! - `[DONE]` and empty-data filtering
//! - an idle timeout between events
//! - error mapping onto [`ProviderError`]
//! - a line scanner for SSE bodies read in one piece (MCP replies)

use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use tracing::warn;

use crate::provider::ProviderError;

/// One decoded SSE event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, empty for the default `message` type.
    pub event: String,
    /// `data:` payload, trimmed.
    pub data: String,
}

/// Decode an HTTP byte stream into SSE events.
///
/// The stream ends after the first error. When no event arrives within
/// `idle_timeout` a [`ProviderError::Timeout`] is yielded.
pub fn sse_events<S>(
    bytes: S,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(bytes.eventsource());
        loop {
            let Ok(next) = tokio::time::timeout(idle_timeout, events.next()).await else {
                yield Err(ProviderError::Timeout {
                    after_ms: u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX),
                });
                break;
            };
            match next {
                None => break,
                Some(Ok(event)) => {
                    let data = event.data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    yield Ok(SseEvent {
                        event: event.event,
                        data: data.to_owned(),
                    });
                }
                Some(Err(EventStreamError::Transport(e))) => {
                    yield Err(ProviderError::Http(e));
                    break;
                }
                Some(Err(e)) => {
                    yield Err(ProviderError::SseParse {
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
    }
}

/// Parse JSON from an SSE data payload, logging and skipping bad payloads.
pub fn parse_sse_data<T: serde::de::DeserializeOwned>(data: &str, provider: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(
                provider,
                error = %e,
                data_preview = %data.chars().take(100).collect::<String>(),
                "failed to parse SSE data"
            );
            None
        }
    }
}

/// `data:` payloads of an SSE body that was read as a whole, in order.
pub fn sse_data_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines().filter_map(|line| {
        let data = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))?
            .trim();
        (!data.is_empty() && data != "[DONE]").then_some(data)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
