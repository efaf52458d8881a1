//! Shared cache-plus-broadcast substrate contract.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::FanOutResult;

/// `(channel, payload)` pairs received from a subscription. The stream ends
/// when the connection to the substrate is lost.
pub type SubstrateStream = Pin<Box<dyn Stream<Item = (String, String)> + Send>>;

/// Key-value cache with expiry plus publish/subscribe channels, shared by
/// every server instance.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Whether the substrate is currently connected.
    fn is_available(&self) -> bool;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FanOutResult<()>;

    /// Value under `key`, or `None` when missing or expired.
    async fn get(&self, key: &str) -> FanOutResult<Option<String>>;

    /// Broadcast `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> FanOutResult<()>;

    /// Subscribe to `channels`.
    async fn subscribe(&self, channels: &[String]) -> FanOutResult<SubstrateStream>;
}
