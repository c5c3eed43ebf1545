use crate::document::{Document, DocumentInner};
use crate::node::ElementId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

/// One child-list change: `added` and `removed` are direct children of `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: ElementId,
    pub added: Vec<ElementId>,
    pub removed: Vec<ElementId>,
}

/// Receives every record queued for an observer since the previous [`Document::flush`].
pub type MutationCallback = Arc<dyn Fn(&[MutationRecord], &Document) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObserverId(pub(crate) u64);

pub(crate) struct ObserverEntry {
    pub(crate) id: ObserverId,
    pub(crate) target: ElementId,
    pub(crate) callback: MutationCallback,
    pub(crate) queue: Vec<MutationRecord>,
}

/// Registration of a subtree child-list observer.
///
/// Records stop being queued once the observer is disconnected, explicitly or by
/// dropping the handle. The handle holds the document weakly.
pub struct MutationObserver {
    pub(crate) id: ObserverId,
    pub(crate) target: ElementId,
    pub(crate) document: Weak<Mutex<DocumentInner>>,
}

impl MutationObserver {
    pub const fn target(&self) -> ElementId {
        self.target
    }

    /// Stops observation and discards records not yet delivered.
    pub fn disconnect(&self) {
        let Some(document) = self.document.upgrade() else {
            return;
        };
        // The callback may own this handle's owner; drop it after the lock is released.
        let removed = {
            let mut inner = document.lock();
            let position = inner.observers.iter().position(|o| o.id == self.id);
            position.map(|p| inner.observers.remove(p))
        };
        if removed.is_some() {
            trace!(observer = self.id.0, target = %self.target, "Mutation observer disconnected");
        }
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationObserver")
            .field("id", &self.id.0)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
