use crate::endpoint::TabEndpoint;
use crate::error::BusError;
use crate::message::{Message, TabId};
use crate::origin::{Origin, OriginPattern};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// A safe default for per-tab buffers; settings traffic is tiny.
pub const DEFAULT_CAPACITY: usize = 64;
const MIN_CAPACITY: usize = 1;

#[derive(Debug)]
struct TabSlot {
    origin: Origin,
    sender: broadcast::Sender<Arc<Message>>,
}

#[derive(Debug, Default)]
pub(crate) struct BusInner {
    tabs: RwLock<FxHashMap<TabId, TabSlot>>,
    closed: AtomicBool,
}

impl BusInner {
    pub(crate) fn disconnect(&self, id: TabId) {
        if self.tabs.write().remove(&id).is_some() {
            debug!(tab = %id, "Tab disconnected");
        }
    }
}

/// Cross-tab message bus.
///
/// Every connected tab owns a bounded channel keyed by its [`TabId`] and tagged with
/// its [`Origin`]. Broadcasts are fire-and-forget: tabs without a live listener are
/// skipped silently, and nothing is retried.
#[derive(Debug, Clone, Default)]
pub struct TabBus {
    inner: Arc<BusInner>,
}

impl TabBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn from_inner(inner: Arc<BusInner>) -> Self {
        Self { inner }
    }

    /// Connects a tab with the default buffer capacity.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after [`TabBus::shutdown`].
    pub fn connect(&self, origin: Origin) -> Result<TabEndpoint, BusError> {
        self.connect_with_capacity(origin, DEFAULT_CAPACITY)
    }

    /// # Errors
    ///
    /// Returns [`BusError::InvalidCapacity`] for a zero capacity and
    /// [`BusError::Closed`] after [`TabBus::shutdown`].
    pub fn connect_with_capacity(
        &self,
        origin: Origin,
        capacity: usize,
    ) -> Result<TabEndpoint, BusError> {
        if capacity < MIN_CAPACITY {
            return Err(BusError::InvalidCapacity {
                message: format!("capacity must be >= {MIN_CAPACITY}").into(),
                context: None,
            });
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed { message: "bus is shut down".into(), context: None });
        }

        let id = TabId::next();
        let (sender, receiver) = broadcast::channel(capacity);
        self.inner.tabs.write().insert(id, TabSlot { origin: origin.clone(), sender });
        debug!(tab = %id, origin = %origin, "Tab connected");

        Ok(TabEndpoint::new(id, origin, receiver, Arc::downgrade(&self.inner)))
    }

    /// Delivers `message` to every connected tab whose origin matches `pattern`,
    /// except its sender. Returns the number of tabs reached.
    pub fn broadcast(&self, pattern: &OriginPattern, message: Message) -> usize {
        let message = Arc::new(message);
        let tabs = self.inner.tabs.read();
        let mut delivered = 0;
        for (id, slot) in tabs.iter() {
            if Some(*id) == message.sender || !pattern.matches(&slot.origin) {
                continue;
            }
            if slot.sender.send(Arc::clone(&message)).is_ok() {
                delivered += 1;
            } else {
                trace!(tab = %id, "Message dropped: tab has no live receiver");
            }
        }
        trace!(kind = %message.kind, delivered, "Message broadcast");
        delivered
    }

    /// Delivers `message` to a single tab; `false` when it is gone.
    pub fn send_to(&self, tab: TabId, message: Message) -> bool {
        self.inner
            .tabs
            .read()
            .get(&tab)
            .is_some_and(|slot| slot.sender.send(Arc::new(message)).is_ok())
    }

    /// Connected tabs matching `pattern`.
    pub fn tabs(&self, pattern: &OriginPattern) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .inner
            .tabs
            .read()
            .iter()
            .filter(|(_, slot)| pattern.matches(&slot.origin))
            .map(|(id, _)| *id)
            .collect();
        tabs.sort_unstable();
        tabs
    }

    pub fn tab_count(&self) -> usize {
        self.inner.tabs.read().len()
    }

    /// Disconnects every tab; pending receivers observe the end of their stream.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let drained = std::mem::take(&mut *self.inner.tabs.write());
        debug!(tabs = drained.len(), "Tab bus shut down");
    }
}
