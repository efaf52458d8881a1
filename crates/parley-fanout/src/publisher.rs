//! Write-then-publish.
//!
//! A message snapshot is written to the shared cache before its pointer is
//! broadcast, so any instance that sees the pointer can resolve it. When the
//! substrate is missing or a call fails, the event goes straight to this
//! instance's [`LocalHub`].

use std::sync::Arc;
use std::time::Duration;

use parley_core::{Chat, ChatId, Message};
use parley_settings::FanoutSettings;
use tracing::{debug, warn};

use crate::errors::{FanOutError, FanOutResult};
use crate::events::{message_key, ChatEvent, DocumentStatus, ErrorPointer, MessagePointer, MessageSnapshot};
use crate::hub::LocalHub;
use crate::substrate::Substrate;

/// Publishes chat and document events.
#[derive(Clone)]
pub struct FanOut {
    substrate: Option<Arc<dyn Substrate>>,
    hub: LocalHub,
    settings: FanoutSettings,
}

impl FanOut {
    /// Publisher over a shared substrate.
    pub fn new(substrate: Arc<dyn Substrate>, hub: LocalHub, settings: FanoutSettings) -> Self {
        Self {
            substrate: Some(substrate),
            hub,
            settings,
        }
    }

    /// Publisher that only delivers to this instance.
    pub fn local(hub: LocalHub, settings: FanoutSettings) -> Self {
        Self {
            substrate: None,
            hub,
            settings,
        }
    }

    /// This instance's hub.
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }

    /// Fan-out settings.
    pub fn settings(&self) -> &FanoutSettings {
        &self.settings
    }

    fn connected(&self) -> FanOutResult<&Arc<dyn Substrate>> {
        match &self.substrate {
            Some(substrate) if substrate.is_available() => Ok(substrate),
            _ => Err(FanOutError::Unavailable),
        }
    }

    /// Publish a message snapshot.
    #[tracing::instrument(skip_all, fields(chat_id = %chat.id, message_id = %message.id, streaming = streaming))]
    pub async fn publish_chat_message(&self, chat: &Chat, message: &Message, streaming: bool) {
        if let Err(error) = self.send_message(chat, message, streaming).await {
            warn!(%error, "fan-out degraded, delivering message locally");
            self.hub.deliver_chat(ChatEvent::message(chat.clone(), message.clone(), streaming));
        }
    }

    async fn send_message(&self, chat: &Chat, message: &Message, streaming: bool) -> FanOutResult<()> {
        let substrate = self.connected()?;
        let snapshot = serde_json::to_string(&MessageSnapshot {
            message: message.clone(),
            chat: chat.clone(),
        })?;
        let pointer = serde_json::to_string(&MessagePointer {
            chat_id: chat.id.clone(),
            message_id: message.id.clone(),
            streaming,
        })?;
        let ttl = Duration::from_secs(self.settings.message_expiration_secs);
        substrate.set(&message_key(&message.id), &snapshot, ttl).await?;
        substrate.publish(&self.settings.channel_chat_message, &pointer).await?;
        debug!("published message pointer");
        Ok(())
    }

    /// Publish a chat-level error.
    #[tracing::instrument(skip_all, fields(chat_id = %chat_id))]
    pub async fn publish_chat_error(&self, chat_id: &ChatId, error: &str) {
        let result = async {
            let substrate = self.connected()?;
            let payload = serde_json::to_string(&ErrorPointer {
                chat_id: chat_id.clone(),
                error: Some(error.to_owned()),
            })?;
            substrate.publish(&self.settings.channel_chat_error, &payload).await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "fan-out degraded, delivering error locally");
            self.hub.deliver_chat(ChatEvent::Error {
                chat_id: chat_id.clone(),
                error: error.to_owned(),
            });
        }
    }

    /// Publish a document status update.
    #[tracing::instrument(skip_all, fields(document_id = %status.document_id))]
    pub async fn publish_document_status(&self, status: &DocumentStatus) {
        let result = async {
            let substrate = self.connected()?;
            let payload = serde_json::to_string(status)?;
            substrate.publish(&self.settings.channel_document_status, &payload).await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "fan-out degraded, delivering document status locally");
            self.hub.deliver_document(status.clone());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
