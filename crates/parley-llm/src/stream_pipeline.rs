//! Stream pipeline helpers shared by adapters.
//!
//! - [`enforce_contract`] makes any adapter stream honor the four-event
//!   contract: one `Start`, then progress, then exactly one terminal item.
//! - [`collect_response`] drains a stream into its final [`ModelResponse`],
//!   for adapters whose synchronous path reuses streaming.

use futures::StreamExt;
use parley_core::{ModelResponse, ProviderEvent};
use tracing::{debug, error};

use crate::provider::{ProviderError, ProviderEventStream, ProviderResult};

/// Normalize an adapter stream.
///
/// - A missing `Start` is inserted before the first item; repeated ones are dropped.
/// - Nothing is forwarded after the terminal item.
/// - A stream that ends without a terminal item ends with an error.
pub fn enforce_contract(provider: &'static str, inner: ProviderEventStream) -> ProviderEventStream {
    Box::pin(async_stream::stream! {
        let mut inner = inner;
        let mut started = false;
        let mut finished = false;

        while let Some(item) = inner.next().await {
            if !started {
                started = true;
                yield Ok(ProviderEvent::Start);
            }
            match item {
                Ok(ProviderEvent::Start) => {}
                Ok(ProviderEvent::Complete(response)) => {
                    finished = true;
                    yield Ok(ProviderEvent::Complete(response));
                    break;
                }
                Ok(progress @ ProviderEvent::Progress(_)) => yield Ok(progress),
                Err(e) => {
                    error!(provider, error = %e, category = e.category(), "stream failed");
                    finished = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !finished {
            if !started {
                yield Ok(ProviderEvent::Start);
            }
            debug!(provider, "stream ended without a terminal event");
            yield Err(ProviderError::other("Stream ended unexpectedly"));
        }
    })
}

/// Drain a stream and return its final response.
pub async fn collect_response(mut stream: ProviderEventStream) -> ProviderResult<ModelResponse> {
    while let Some(item) = stream.next().await {
        if let ProviderEvent::Complete(response) = item? {
            return Ok(response);
        }
    }
    Err(ProviderError::other("Stream ended unexpectedly"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parley_core::ProgressUpdate;

    fn stream_of(items: Vec<ProviderResult<ProviderEvent>>) -> ProviderEventStream {
        Box::pin(futures::stream::iter(items))
    }

    async fn normalize(items: Vec<ProviderResult<ProviderEvent>>) -> Vec<ProviderResult<ProviderEvent>> {
        enforce_contract("test", stream_of(items)).collect().await
    }

    #[tokio::test]
    async fn inserts_missing_start() {
        let events = normalize(vec![
            Ok(ProviderEvent::Progress(ProgressUpdate::token("a"))),
            Ok(ProviderEvent::Complete(ModelResponse::text("a"))),
        ])
        .await;
        assert_eq!(events.len(), 3);
        assert_matches!(events[0], Ok(ProviderEvent::Start));
    }

    #[tokio::test]
    async fn drops_duplicate_start_and_trailing_items() {
        let events = normalize(vec![
            Ok(ProviderEvent::Start),
            Ok(ProviderEvent::Start),
            Ok(ProviderEvent::Complete(ModelResponse::text("a"))),
            Ok(ProviderEvent::Progress(ProgressUpdate::token("late"))),
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_matches!(events[1], Ok(ProviderEvent::Complete(_)));
    }

    #[tokio::test]
    async fn error_before_anything_still_starts() {
        let events = normalize(vec![Err(ProviderError::other("boom"))]).await;
        assert_eq!(events.len(), 2);
        assert_matches!(events[0], Ok(ProviderEvent::Start));
        assert_matches!(events[1], Err(ProviderError::Other { .. }));
    }

    #[tokio::test]
    async fn premature_end_is_an_error() {
        let events = normalize(vec![Ok(ProviderEvent::Progress(ProgressUpdate::token("a")))]).await;
        assert_matches!(events.last(), Some(Err(ProviderError::Other { .. })));

        let events = normalize(vec![]).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn collect_returns_complete() {
        let response = collect_response(stream_of(vec![
            Ok(ProviderEvent::Start),
            Ok(ProviderEvent::Progress(ProgressUpdate::token("4"))),
            Ok(ProviderEvent::Complete(ModelResponse::text("4"))),
        ]))
        .await
        .unwrap();
        assert_eq!(response.content, "4");
    }

    #[tokio::test]
    async fn collect_propagates_error() {
        let result = collect_response(stream_of(vec![Ok(ProviderEvent::Start), Err(ProviderError::Cancelled)])).await;
        assert_matches!(result, Err(ProviderError::Cancelled));
    }
}
