use tokio::sync::broadcast;

use crate::transition::StoreEvent;

/// Fan-out bus for store events. Subscribers that fall more than the channel
/// capacity behind lose the oldest events and receive a `Lagged` error, after
/// which they should resynchronize from a store snapshot.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Send to all current subscribers. A send with no subscribers is fine.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
