//! Bridge from substrate channels to the local hub.
//!
//! Every instance runs one bridge. Message pointers are resolved against the
//! snapshot cache, errors and document updates are forwarded as-is. A lost
//! subscription is re-established with capped exponential backoff; the bridge
//! gives up once the reconnect budget is spent and the publisher keeps
//! delivering locally.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_settings::FanoutSettings;

use crate::errors::FanOutResult;
use crate::events::{message_key, ChatEvent, DocumentStatus, ErrorPointer, MessagePointer, MessageSnapshot, SNAPSHOT_MISSING};
use crate::hub::LocalHub;
use crate::substrate::Substrate;

const UNKNOWN_ERROR: &str = "Unknown error";

/// Substrate subscriber feeding a [`LocalHub`].
pub struct SubscriberBridge {
    substrate: Arc<dyn Substrate>,
    hub: LocalHub,
    settings: FanoutSettings,
    shutdown: CancellationToken,
}

impl SubscriberBridge {
    /// Create a bridge. Cancelling `shutdown` stops it.
    pub fn new(substrate: Arc<dyn Substrate>, hub: LocalHub, settings: FanoutSettings, shutdown: CancellationToken) -> Self {
        Self {
            substrate,
            hub,
            settings,
            shutdown,
        }
    }

    /// Run the bridge on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Subscribe and forward until shutdown or until reconnects are exhausted.
    #[tracing::instrument(skip_all, name = "fanout_subscriber")]
    pub async fn run(self) {
        let channels = vec![
            self.settings.channel_chat_message.clone(),
            self.settings.channel_chat_error.clone(),
            self.settings.channel_document_status.clone(),
        ];
        let mut attempt = 0u32;
        loop {
            let subscribed = tokio::select! {
                () = self.shutdown.cancelled() => break,
                result = self.substrate.subscribe(&channels) => result,
            };
            match subscribed {
                Ok(mut stream) => {
                    attempt = 0;
                    info!("fan-out subscription established");
                    loop {
                        let next = tokio::select! {
                            () = self.shutdown.cancelled() => return,
                            next = stream.next() => next,
                        };
                        let Some((channel, payload)) = next else { break };
                        if let Err(e) = self.dispatch(&channel, &payload).await {
                            error!(channel, error = %e, "failed to process fan-out payload");
                        }
                    }
                    warn!("fan-out subscription lost");
                }
                Err(e) => warn!(attempt, error = %e, "fan-out subscribe failed"),
            }

            let Some(delay) = self.settings.reconnect.delay_for(attempt) else {
                warn!(attempts = attempt, "fan-out reconnect budget exhausted, cross-instance delivery disabled");
                break;
            };
            attempt += 1;
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        debug!("fan-out subscriber stopped");
    }

    async fn dispatch(&self, channel: &str, payload: &str) -> FanOutResult<()> {
        if channel == self.settings.channel_document_status {
            let status: DocumentStatus = serde_json::from_str(payload)?;
            self.hub.deliver_document(status);
        } else if channel == self.settings.channel_chat_error {
            let pointer: ErrorPointer = serde_json::from_str(payload)?;
            self.hub.deliver_chat(ChatEvent::Error {
                chat_id: pointer.chat_id,
                error: pointer.error.unwrap_or_else(|| UNKNOWN_ERROR.to_owned()),
            });
        } else if channel == self.settings.channel_chat_message {
            let pointer: MessagePointer = serde_json::from_str(payload)?;
            let event = match self.substrate.get(&message_key(&pointer.message_id)).await? {
                Some(cached) => {
                    let snapshot: MessageSnapshot = serde_json::from_str(&cached)?;
                    ChatEvent::message(snapshot.chat, snapshot.message, pointer.streaming)
                }
                None => {
                    error!(chat_id = %pointer.chat_id, message_id = %pointer.message_id, "message snapshot missing from cache");
                    ChatEvent::Error {
                        chat_id: pointer.chat_id,
                        error: SNAPSHOT_MISSING.to_owned(),
                    }
                }
            };
            self.hub.deliver_chat(event);
        } else {
            debug!(channel, "ignoring payload on unknown channel");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_core::{Chat, ChatId, Message, MessageRole};

    use super::*;
    use crate::errors::FanOutError;
    use crate::local::LocalSubstrate;
    use crate::publisher::FanOut;
    use crate::substrate::SubstrateStream;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn pointer_resolves_to_cached_snapshot_on_other_instance() {
        let substrate = Arc::new(LocalSubstrate::default());
        let settings = FanoutSettings::default();
        let shutdown = CancellationToken::new();

        // Instance B only subscribes.
        let hub_b = LocalHub::default();
        let mut events_b = hub_b.subscribe_chats();
        let bridge = SubscriberBridge::new(substrate.clone(), hub_b, settings.clone(), shutdown.clone()).spawn();
        settle().await;

        // Instance A publishes.
        let fanout_a = FanOut::new(substrate.clone(), LocalHub::default(), settings);
        let chat = Chat::new(None);
        let mut message = Message::new(chat.id.clone(), MessageRole::Assistant, "");
        let texts = ["He", "Hello", "Hello!"];
        for (i, text) in texts.iter().enumerate() {
            message.content = (*text).to_owned();
            fanout_a.publish_chat_message(&chat, &message, i + 1 < texts.len()).await;
        }

        // Every pointer reads the latest cached snapshot, so intermediate
        // texts may be skipped but never regress.
        let mut received = Vec::new();
        for _ in texts {
            match events_b.recv().await.unwrap() {
                ChatEvent::Message { message, streaming, .. } => received.push((streaming, *message)),
                other => panic!("snapshot missing: {other:?}"),
            }
        }
        assert!(received.windows(2).all(|w| w[0].1.content.len() <= w[1].1.content.len()));
        let (streaming, last) = received.last().unwrap();
        assert!(!streaming);
        assert_eq!(last, &message);
        shutdown.cancel();
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn missing_snapshot_becomes_sync_error() {
        let substrate = Arc::new(LocalSubstrate::default());
        let settings = FanoutSettings::default();
        let hub = LocalHub::default();
        let mut events = hub.subscribe_chats();
        let bridge = SubscriberBridge::new(substrate.clone(), hub, settings.clone(), CancellationToken::new());

        let pointer = r#"{"chatId":"c1","messageId":"gone","streaming":false}"#;
        bridge.dispatch(&settings.channel_chat_message, pointer).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.chat_id(), &ChatId::from("c1"));
        assert_eq!(event.error_text(), Some(SNAPSHOT_MISSING));
    }

    #[tokio::test]
    async fn error_without_text_is_unknown() {
        let settings = FanoutSettings::default();
        let hub = LocalHub::default();
        let mut events = hub.subscribe_chats();
        let bridge = SubscriberBridge::new(Arc::new(LocalSubstrate::default()), hub, settings.clone(), CancellationToken::new());
        bridge.dispatch(&settings.channel_chat_error, r#"{"chatId":"c1"}"#).await.unwrap();
        assert_eq!(events.recv().await.unwrap().error_text(), Some(UNKNOWN_ERROR));
    }

    struct FlakySubstrate {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Substrate for FlakySubstrate {
        fn is_available(&self) -> bool {
            false
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> FanOutResult<()> {
            Err(FanOutError::Unavailable)
        }
        async fn get(&self, _: &str) -> FanOutResult<Option<String>> {
            Err(FanOutError::Unavailable)
        }
        async fn publish(&self, _: &str, _: &str) -> FanOutResult<()> {
            Err(FanOutError::Unavailable)
        }
        async fn subscribe(&self, _: &[String]) -> FanOutResult<SubstrateStream> {
            let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(FanOutError::substrate("ECONNREFUSED"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_budget_is_bounded() {
        let substrate = Arc::new(FlakySubstrate {
            attempts: AtomicU32::new(0),
        });
        let bridge = SubscriberBridge::new(substrate.clone(), LocalHub::default(), FanoutSettings::default(), CancellationToken::new());
        let started = tokio::time::Instant::now();
        bridge.run().await;
        // First try plus five retries, waiting 100+200+400+800+1600 ms.
        assert_eq!(substrate.attempts.load(Ordering::SeqCst), 6);
        assert_eq!(started.elapsed(), Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_disconnect() {
        let substrate = Arc::new(LocalSubstrate::default());
        let settings = FanoutSettings::default();
        let hub = LocalHub::default();
        let mut events = hub.subscribe_chats();
        let shutdown = CancellationToken::new();
        let bridge = SubscriberBridge::new(substrate.clone(), hub, settings.clone(), shutdown.clone()).spawn();
        settle().await;

        substrate.set_available(false);
        settle().await;
        substrate.set_available(true);
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;

        let payload = r#"{"chatId":"c9","error":"late"}"#;
        substrate.publish(&settings.channel_chat_error, payload).await.unwrap();
        assert_eq!(events.recv().await.unwrap().error_text(), Some("late"));
        shutdown.cancel();
        bridge.await.unwrap();
    }
}
