//! Process-local cancellation flags for running generations.
//!
//! Cancellation is cooperative: the generation loop polls the registry at
//! each progress event. Only turns generating on this instance are tracked;
//! a turn is tracked from spawn until its terminal snapshot is written.
//! Other instances learn about a cancellation from the `cancelled` snapshot
//! the cancelling instance broadcasts.

use std::sync::Arc;

use dashmap::DashMap;
use parley_core::{MessageId, StreamStatus};
use parley_fanout::{ChatEvent, LocalHub};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Turns generating on this instance, flagged once cancelled.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    running: DashMap<MessageId, bool>,
}

impl CancellationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a generation. A flag left over from an earlier
    /// generation of the same turn is reset.
    pub fn track(&self, id: &MessageId) {
        if self.running.insert(id.clone(), false) == Some(true) {
            debug!(message_id = %id, "stale cancellation reset");
        }
    }

    /// Flag a running turn as cancelled. Returns whether this instance is
    /// generating it.
    pub fn cancel(&self, id: &MessageId) -> bool {
        match self.running.get_mut(id) {
            Some(mut flag) => {
                if !*flag {
                    *flag = true;
                    debug!(message_id = %id, "turn cancelled");
                }
                true
            }
            None => false,
        }
    }

    /// Whether a running turn has been cancelled.
    pub fn is_cancelled(&self, id: &MessageId) -> bool {
        self.running.get(id).is_some_and(|flag| *flag)
    }

    /// Stop tracking a generation. Returns whether it was cancelled.
    pub fn untrack(&self, id: &MessageId) -> bool {
        self.running.remove(id).is_some_and(|(_, cancelled)| cancelled)
    }

    /// Number of tracked generations.
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Whether no generation is tracked.
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Flag local generations whose `cancelled` snapshot reaches `hub`,
    /// until `shutdown`. Snapshots of turns not generating here are ignored.
    pub fn learn_from(self: &Arc<Self>, hub: &LocalHub, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut events = hub.subscribe_chats();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(ChatEvent::Message { message, .. }) if message.status == Some(StreamStatus::Cancelled) => {
                        let _ = registry.cancel(&message.id);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(lagged = n, "cancellation listener lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
