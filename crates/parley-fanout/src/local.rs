//! In-process [`Substrate`] for single-instance deployments and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::errors::{FanOutError, FanOutResult};
use crate::substrate::{Substrate, SubstrateStream};

/// Cache and channels held in memory.
///
/// [`LocalSubstrate::set_available`] simulates a dropped connection: calls
/// fail with [`FanOutError::Unavailable`] and open subscriptions end.
pub struct LocalSubstrate {
    entries: DashMap<String, (String, Instant)>,
    tx: broadcast::Sender<(String, String)>,
    available: AtomicBool,
    connection: watch::Sender<bool>,
}

impl LocalSubstrate {
    /// Substrate whose broadcast channel buffers `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (connection, _) = watch::channel(true);
        Self {
            entries: DashMap::new(),
            tx,
            available: AtomicBool::new(true),
            connection,
        }
    }

    /// Connect or disconnect.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        self.connection.send_replace(available);
    }

    fn ensure_available(&self) -> FanOutResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(FanOutError::Unavailable)
        }
    }
}

impl Default for LocalSubstrate {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Substrate for LocalSubstrate {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FanOutResult<()> {
        self.ensure_available()?;
        let _ = self.entries.insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> FanOutResult<Option<String>> {
        self.ensure_available()?;
        match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => return Ok(Some(entry.0.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        let _ = self.entries.remove(key);
        Ok(None)
    }

    async fn publish(&self, channel: &str, payload: &str) -> FanOutResult<()> {
        self.ensure_available()?;
        // No subscribers is not an error.
        let receivers = self.tx.send((channel.to_owned(), payload.to_owned())).unwrap_or(0);
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> FanOutResult<SubstrateStream> {
        self.ensure_available()?;
        let channels = channels.to_vec();
        let mut connection = self.connection.subscribe();
        let disconnected = async move {
            let _ = connection.wait_for(|up| !*up).await;
        };
        let stream = BroadcastStream::new(self.tx.subscribe())
            .filter_map(move |item| {
                let item = match item {
                    Ok((channel, payload)) if channels.contains(&channel) => Some((channel, payload)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "local substrate subscriber lagged");
                        None
                    }
                };
                futures::future::ready(item)
            })
            .take_until(Box::pin(disconnected));
        Ok(Box::pin(stream))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let substrate = LocalSubstrate::default();
        substrate.set("k", "v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(substrate.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(substrate.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscription_filters_channels() {
        let substrate = LocalSubstrate::default();
        let mut stream = substrate.subscribe(&["a".to_owned()]).await.unwrap();
        substrate.publish("b", "skip").await.unwrap();
        substrate.publish("a", "keep").await.unwrap();
        assert_eq!(stream.next().await, Some(("a".to_owned(), "keep".to_owned())));
    }

    #[tokio::test]
    async fn disconnect_ends_subscriptions_and_fails_calls() {
        let substrate = LocalSubstrate::default();
        let mut stream = substrate.subscribe(&["a".to_owned()]).await.unwrap();
        substrate.set_available(false);
        assert_eq!(stream.next().await, None);
        assert_matches!(substrate.publish("a", "x").await, Err(FanOutError::Unavailable));
        assert_matches!(substrate.get("k").await, Err(FanOutError::Unavailable));
    }
}
