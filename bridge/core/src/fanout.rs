//! Subscriber Fan-out
//!
//! The orchestrator only knows the [`EventSink`] contract. [`SubscriberRegistry`]
//! is the in-process implementation: each observer gets its own bounded
//! channel and every emitted event is offered to all of them.
//!
//! # Architecture
//!
//! ```text
//!                    SubscriberRegistry
//!            ┌───────────────────────────────────────┐
//!            │ HashMap<SubscriberId, Subscriber>     │
//!            │   - wrapped in Arc<RwLock<>>          │
//!            └───────────────┬───────────────────────┘
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          │                 │                 │
//!   ┌──────▼──────┐   ┌──────▼──────┐   ┌──────▼──────┐
//!   │   Console   │   │  IDE panel  │   │   Web UI    │
//!   │    sub-1    │   │    sub-2    │   │    sub-3    │
//!   └─────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! Delivery never blocks the review: a subscriber whose buffer is full misses
//! the event, and a subscriber whose receiver was dropped is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::ReviewEvent;
use crate::session::SessionState;

/// Default per-subscriber buffer
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Receives events emitted by the orchestrator
///
/// `emit` is called synchronously, in order, from the review task. It must not
/// block.
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: ReviewEvent);
}

/// Unique identifier for a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Create a new unique subscriber ID
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered observer
#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<ReviewEvent>,
    label: String,
}

/// Outcome of offering one event to every subscriber
#[derive(Debug, Default)]
struct BroadcastResult {
    lagging: Vec<SubscriberId>,
    disconnected: Vec<SubscriberId>,
}

/// Registry of event subscribers
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
    buffer: usize,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry with the default buffer size
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create an empty registry with a per-subscriber buffer size
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Register an observer
    ///
    /// The first event on the returned receiver is a `state-changed` carrying
    /// `current`, so late joiners render the live session immediately.
    pub fn subscribe(
        &self,
        label: impl Into<String>,
        current: Arc<SessionState>,
    ) -> (SubscriberId, mpsc::Receiver<ReviewEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriberId::new();
        let label = label.into();

        // Fresh channel with capacity >= 1, so this cannot fail.
        let _ = tx.try_send(ReviewEvent::StateChanged { state: current });

        self.inner.write().insert(
            id,
            Subscriber {
                tx,
                label: label.clone(),
            },
        );
        tracing::info!(subscriber = %id, label = %label, "Subscriber registered");
        (id, rx)
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let removed = self.inner.write().remove(id);
        if let Some(sub) = &removed {
            tracing::info!(subscriber = %id, label = %sub.label, "Subscriber removed");
        }
        removed.is_some()
    }

    /// Number of subscribers
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether a subscriber is registered
    #[must_use]
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Offer an event to every subscriber without waiting
    fn broadcast(&self, event: &ReviewEvent) -> BroadcastResult {
        let inner = self.inner.read();
        let mut result = BroadcastResult::default();

        for (id, sub) in inner.iter() {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => result.lagging.push(*id),
                Err(TrySendError::Closed(_)) => result.disconnected.push(*id),
            }
        }

        result
    }

    /// Drop subscribers whose receiver is gone. Returns how many were removed.
    pub fn cleanup_disconnected(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|id, sub| {
            let open = !sub.tx.is_closed();
            if !open {
                tracing::info!(subscriber = %id, label = %sub.label, "Subscriber dropped");
            }
            open
        });
        before - inner.len()
    }
}

impl EventSink for SubscriberRegistry {
    fn emit(&self, event: ReviewEvent) {
        let result = self.broadcast(&event);

        for id in &result.lagging {
            tracing::warn!(subscriber = %id, event = event.name(), "Subscriber lagging, event dropped");
        }
        if !result.disconnected.is_empty() {
            self.cleanup_disconnected();
        }
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("count", &self.count())
            .field("buffer", &self.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ReviewEvent {
        ReviewEvent::StreamChunk {
            chunk: text.to_string(),
            accumulated_so_far: text.to_string(),
        }
    }

    #[test]
    fn test_subscriber_id_display() {
        let id = SubscriberId(42);
        assert_eq!(format!("{id}"), "sub-42");
        assert_ne!(SubscriberId::new(), SubscriberId::new());
    }

    #[test]
    fn test_subscribe_delivers_current_state_first() {
        let registry = SubscriberRegistry::new();
        let state = Arc::new(SessionState::default());
        let (_id, mut rx) = registry.subscribe("console", Arc::clone(&state));

        match rx.try_recv().unwrap() {
            ReviewEvent::StateChanged { state: received } => assert_eq!(received, state),
            other => panic!("unexpected first event: {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_reaches_everyone_in_order() {
        let registry = SubscriberRegistry::new();
        let (_a, mut rx_a) = registry.subscribe("a", Arc::default());
        let (_b, mut rx_b) = registry.subscribe("b", Arc::default());
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        registry.emit(chunk("one"));
        registry.emit(chunk("two"));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap(), chunk("one"));
            assert_eq!(rx.try_recv().unwrap(), chunk("two"));
        }
    }

    #[test]
    fn test_unsubscribe() {
        let registry = SubscriberRegistry::new();
        let (id, _rx) = registry.subscribe("ide", Arc::default());
        assert!(registry.contains(&id));
        assert!(registry.unsubscribe(&id));
        assert!(!registry.unsubscribe(&id));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_cleaned_up_on_emit() {
        let registry = SubscriberRegistry::new();
        let (gone, rx) = registry.subscribe("gone", Arc::default());
        let (_kept, _rx_kept) = registry.subscribe("kept", Arc::default());
        drop(rx);

        let result = registry.broadcast(&chunk("x"));
        assert_eq!(result.disconnected, vec![gone]);

        registry.emit(chunk("y"));
        assert!(!registry.contains(&gone));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_full_buffer_drops_event_for_that_subscriber_only() {
        let registry = SubscriberRegistry::with_buffer(1);
        // The initial state-changed fills the single slot.
        let (slow, _rx_slow) = registry.subscribe("slow", Arc::default());

        let result = registry.broadcast(&chunk("x"));
        assert_eq!(result.lagging, vec![slow]);
        assert!(result.disconnected.is_empty());
        assert!(registry.contains(&slow));
    }
}
