//! WebSocket subscriptions.
//!
//! A client opens `/ws/chats/{chat_id}` and receives every [`ChatEvent`] of
//! that chat as a JSON text frame; `/ws/documents` carries document status
//! updates. Sockets are push-only: inbound frames other than close are
//! ignored, and a ping goes out every [`PING_INTERVAL`].
//!
//! [`ChatEvent`]: parley_fanout::ChatEvent

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as Frame, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, Stream, StreamExt};
use parley_core::ChatId;
use parley_fanout::{DocumentStatus, LocalHub};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::server::AppState;

/// Interval between server pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Connection counting
// ─────────────────────────────────────────────────────────────────────────────

/// Number of open subscriptions.
#[derive(Clone, Debug, Default)]
pub struct Connections(Arc<AtomicUsize>);

impl Connections {
    /// Count a new connection until the guard drops.
    pub fn open(&self) -> ConnectionGuard {
        let _ = self.0.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard(Arc::clone(&self.0))
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Decrements the connection count on drop.
#[derive(Debug)]
pub struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /ws/chats/{chat_id}
pub(crate) async fn chat_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
) -> Response {
    ws.on_upgrade(move |socket| serve_chat(socket, state, chat_id))
}

/// GET /ws/documents
pub(crate) async fn document_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_documents(socket, state))
}

#[instrument(skip_all, fields(chat_id = %chat_id))]
async fn serve_chat(socket: WebSocket, state: AppState, chat_id: ChatId) {
    let _guard = state.connections.open();
    info!(connections = state.connections.count(), "chat subscriber connected");
    let events = Box::pin(state.hub.chat_stream(chat_id));
    pump(socket, events, PING_INTERVAL).await;
    info!("chat subscriber disconnected");
}

#[instrument(skip_all)]
async fn serve_documents(socket: WebSocket, state: AppState) {
    let _guard = state.connections.open();
    debug!("document subscriber connected");
    let events = Box::pin(document_stream(&state.hub));
    pump(socket, events, PING_INTERVAL).await;
    debug!("document subscriber disconnected");
}

/// Document status updates. Lagged updates are skipped.
pub fn document_stream(hub: &LocalHub) -> impl Stream<Item = DocumentStatus> + Send + 'static {
    futures::stream::unfold(hub.subscribe_documents(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(status) => return Some((status, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "document subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// Forward `events` to the socket until either side closes.
async fn pump<S, T>(socket: WebSocket, mut events: S, ping_every: Duration)
where
    S: Stream<Item = T> + Unpin,
    T: Serialize,
{
    let (mut sink, mut incoming) = socket.split();
    let mut ping = tokio::time::interval(ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize event");
                        continue;
                    }
                };
                if sink.send(Frame::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Frame::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            frame = incoming.next() => match frame {
                Some(Ok(Frame::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = sink.close().await;
}
