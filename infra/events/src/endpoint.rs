use crate::bus::BusInner;
use crate::message::{Message, TabId};
use crate::origin::{Origin, OriginPattern};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One tab's connection to a [`TabBus`](crate::TabBus).
///
/// Dropping the endpoint disconnects the tab.
#[derive(Debug)]
pub struct TabEndpoint {
    id: TabId,
    origin: Origin,
    receiver: broadcast::Receiver<Arc<Message>>,
    bus: Weak<BusInner>,
}

impl TabEndpoint {
    pub(crate) const fn new(
        id: TabId,
        origin: Origin,
        receiver: broadcast::Receiver<Arc<Message>>,
        bus: Weak<BusInner>,
    ) -> Self {
        Self { id, origin, receiver, bus }
    }

    pub const fn id(&self) -> TabId {
        self.id
    }

    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Receives the next message, returning `None` once the tab is disconnected.
    ///
    /// Messages lost to a lagging receiver are skipped and logged.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        let mut skipped = 0u64;

        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if skipped > 0 {
                        warn!(
                            tab = %self.id,
                            skipped,
                            "Tab receiver lagged; continuing from latest message"
                        );
                    }
                    return Some(message);
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    skipped = skipped.saturating_add(n);
                    debug!(tab = %self.id, skipped = n, total_skipped = skipped, "Tab receiver lagged");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`TabEndpoint::recv`]; drains lag the same way.
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    debug!(tab = %self.id, skipped = n, "Tab receiver lagged");
                },
                Err(_) => return None,
            }
        }
    }

    /// Broadcasts `message` as this tab; it is never echoed back to the sender.
    pub fn send(&self, pattern: &OriginPattern, mut message: Message) -> usize {
        message.sender = Some(self.id);
        let Some(inner) = self.bus.upgrade() else {
            return 0;
        };
        crate::TabBus::from_inner(inner).broadcast(pattern, message)
    }
}

impl Drop for TabEndpoint {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.disconnect(self.id);
        }
    }
}
