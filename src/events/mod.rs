//! Event system for state notifications
//!
//! The gadget manager and the bridge session publish their log stream and
//! state changes here; a UI or the CLI subscribes.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Events a subscriber may fall behind by before it sees `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`SystemEvent`]s over a `broadcast` channel
///
/// Publishing never waits. Subscribers drain what was queued and then see
/// `Closed` once every `EventBus` holding the sender is dropped.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Dropped when nobody is subscribed
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
