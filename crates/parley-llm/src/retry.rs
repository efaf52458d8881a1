//! # Rate-limit retry
//!
//! Retries HTTP 429 answers with a fixed delay and a bounded count.
//!
//! **Key constraint**: a stream is only retried while nothing has been
//! yielded to the caller. Once the first event is out, the consumer may have
//! acted on it, so later errors pass through unchanged.
//!
//! `429 request too large` is not retried: resending the same payload cannot
//! succeed, and the RAG path shrinks the request instead.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use parley_core::retry::RateLimitRetry;
use tracing::warn;

use crate::provider::{ProviderError, ProviderEventStream, ProviderResult};

/// Creates a fresh stream on each attempt.
pub type StreamFactory = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = ProviderResult<ProviderEventStream>> + Send>> + Send,
>;

fn should_retry(err: &ProviderError, attempt: u32, policy: &RateLimitRetry) -> bool {
    err.is_rate_limited() && !err.is_context_too_large() && attempt < policy.max_retries
}

fn delay_for(err: &ProviderError, policy: &RateLimitRetry) -> std::time::Duration {
    let fixed = policy.delay();
    err.retry_after_ms()
        .map_or(fixed, |ms| fixed.max(std::time::Duration::from_millis(ms)))
}

/// Wrap a stream factory with rate-limit retry.
///
/// Both a failed factory call and an `Err` as the very first stream item
/// are retried.
pub fn with_rate_limit_retry(
    provider: &'static str,
    factory: StreamFactory,
    policy: RateLimitRetry,
) -> ProviderEventStream {
    Box::pin(async_stream::stream! {
        let mut attempt = 0u32;

        'attempts: loop {
            let err = match factory().await {
                Ok(mut inner) => {
                    let mut has_yielded = false;
                    loop {
                        match inner.next().await {
                            None => break 'attempts,
                            Some(Err(err)) if !has_yielded && should_retry(&err, attempt, &policy) => {
                                break err;
                            }
                            Some(item) => {
                                has_yielded = true;
                                yield item;
                            }
                        }
                    }
                }
                Err(err) => {
                    if !should_retry(&err, attempt, &policy) {
                        yield Err(err);
                        break;
                    }
                    err
                }
            };

            attempt += 1;
            let delay = delay_for(&err, &policy);
            warn!(
                provider,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "rate limited, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    })
}

/// Retry a one-shot request on rate limiting.
pub async fn retry_rate_limited<T, F, Fut>(
    provider: &'static str,
    policy: &RateLimitRetry,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Err(err) if should_retry(&err, attempt, policy) => {
                attempt += 1;
                let delay = delay_for(&err, policy);
                warn!(provider, attempt, error = %err, "rate limited, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
