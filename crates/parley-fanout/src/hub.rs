//! Per-process delivery to connected clients.

use futures::{Stream, StreamExt};
use parley_core::ChatId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::events::{ChatEvent, DocumentStatus};

/// Broadcast channels feeding this instance's WebSocket connections.
#[derive(Clone, Debug)]
pub struct LocalHub {
    chats: broadcast::Sender<ChatEvent>,
    documents: broadcast::Sender<DocumentStatus>,
}

impl LocalHub {
    /// Hub buffering `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chats: broadcast::channel(capacity).0,
            documents: broadcast::channel(capacity).0,
        }
    }

    /// Deliver a chat event to every local receiver.
    pub fn deliver_chat(&self, event: ChatEvent) {
        let chat_id = event.chat_id().clone();
        match self.chats.send(event) {
            Ok(receivers) => debug!(chat_id = %chat_id, receivers, "delivered chat event"),
            Err(_) => debug!(chat_id = %chat_id, "no local chat receivers"),
        }
    }

    /// Deliver a document status to every local receiver.
    pub fn deliver_document(&self, status: DocumentStatus) {
        let _ = self.documents.send(status);
    }

    /// All chat events.
    pub fn subscribe_chats(&self) -> broadcast::Receiver<ChatEvent> {
        self.chats.subscribe()
    }

    /// All document status updates.
    pub fn subscribe_documents(&self) -> broadcast::Receiver<DocumentStatus> {
        self.documents.subscribe()
    }

    /// Events for one chat. Lagged events are skipped.
    pub fn chat_stream(&self, chat_id: ChatId) -> impl Stream<Item = ChatEvent> + Send + 'static {
        BroadcastStream::new(self.chats.subscribe()).filter_map(move |item| {
            let item = match item {
                Ok(event) if *event.chat_id() == chat_id => Some(event),
                Ok(_) => None,
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "chat subscriber lagged");
                    None
                }
            };
            futures::future::ready(item)
        })
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_stream_only_sees_its_chat() {
        let hub = LocalHub::default();
        let mut stream = Box::pin(hub.chat_stream(ChatId::from("mine")));
        hub.deliver_chat(ChatEvent::Error {
            chat_id: ChatId::from("other"),
            error: "x".into(),
        });
        hub.deliver_chat(ChatEvent::Error {
            chat_id: ChatId::from("mine"),
            error: "y".into(),
        });
        let event = stream.next().await.unwrap();
        assert_eq!(event.error_text(), Some("y"));
    }

    #[test]
    fn delivering_without_receivers_is_fine() {
        let hub = LocalHub::new(0);
        hub.deliver_chat(ChatEvent::Error {
            chat_id: ChatId::from("c"),
            error: "x".into(),
        });
    }
}
