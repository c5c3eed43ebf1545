//! Detection of matching elements inside the watched content subtree.
//!
//! Mutation batches are scanned synchronously; newly seen elements accumulate in a
//! pending set that is delivered once per fixed debounce window, as a single
//! notification per subscriber.

use crate::error::{EngineError, EngineErrorExt};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use reel_domain::features::FeatureId;
use reel_dom::{Document, ElementId, MutationObserver, MutationRecord, Selector};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Receives detected elements, in document order.
pub type ElementCallback = Arc<dyn Fn(&[ElementId]) + Send + Sync>;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObserverStats {
    pub running: bool,
    pub subscribers: usize,
    pub seen: usize,
    pub pending: usize,
    /// Debounced notifications delivered since creation.
    pub deliveries: u64,
}

#[derive(Default)]
struct ObserverState {
    running: bool,
    root: Option<ElementId>,
    subscribers: FxHashMap<FeatureId, ElementCallback>,
    /// Delivery order of subscribers.
    order: Vec<FeatureId>,
    seen: FxHashSet<ElementId>,
    pending: Vec<ElementId>,
    pending_set: FxHashSet<ElementId>,
    mutations: Option<MutationObserver>,
    timer: Option<JoinHandle<()>>,
    /// Bumped by `stop`; a timer armed under an older generation does nothing.
    generation: u64,
    deliveries: u64,
}

impl ObserverState {
    fn enqueue(&mut self, el: ElementId) -> bool {
        if self.seen.contains(&el) || !self.pending_set.insert(el) {
            return false;
        }
        self.pending.push(el);
        true
    }

    fn callbacks(&self) -> Vec<(FeatureId, ElementCallback)> {
        self.order
            .iter()
            .filter_map(|id| self.subscribers.get(id).map(|cb| (id.clone(), Arc::clone(cb))))
            .collect()
    }
}

struct ObserverInner {
    document: Document,
    selector: Selector,
    watch_root: Selector,
    debounce: Duration,
    handle: Handle,
    state: Mutex<ObserverState>,
}

/// Detects matching elements as the host page inserts them and fans them out to
/// subscribed features.
///
/// Cheap to clone; all clones share one detection state.
#[derive(Clone)]
pub struct ElementObserver {
    inner: Arc<ObserverInner>,
}

impl fmt::Debug for ElementObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementObserver")
            .field("selector", &self.inner.selector.as_str())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ElementObserver {
    /// # Errors
    ///
    /// Returns [`EngineError::Dom`] for unparsable selectors and
    /// [`EngineError::Internal`] outside a Tokio runtime.
    pub fn new(
        document: Document,
        selector: &str,
        watch_root: &str,
        debounce: Duration,
    ) -> Result<Self, EngineError> {
        let selector = Selector::parse(selector).context("Element selector")?;
        let watch_root = Selector::parse(watch_root).context("Watch root selector")?;
        let handle = Handle::try_current().map_err(|e| EngineError::Internal {
            message: e.to_string().into(),
            context: Some("ElementObserver needs a Tokio runtime for its debounce timer".into()),
        })?;
        Ok(Self {
            inner: Arc::new(ObserverInner {
                document,
                selector,
                watch_root,
                debounce,
                handle,
                state: Mutex::new(ObserverState::default()),
            }),
        })
    }

    /// The watched subtree: the first `watch_root` match, or the body.
    pub fn resolve_root(&self) -> ElementId {
        let doc = &self.inner.document;
        doc.query(doc.root(), &self.inner.watch_root).unwrap_or_else(|| doc.body())
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    pub fn stats(&self) -> ObserverStats {
        let state = self.inner.state.lock();
        ObserverStats {
            running: state.running,
            subscribers: state.subscribers.len(),
            seen: state.seen.len(),
            pending: state.pending.len(),
            deliveries: state.deliveries,
        }
    }

    /// Adds `callback` under `id`, replacing an earlier subscription with that id, and
    /// synchronously replays every seen element that is still connected.
    pub fn subscribe(&self, id: FeatureId, callback: ElementCallback) {
        let replay: Vec<ElementId> = {
            let mut state = self.inner.state.lock();
            if state.subscribers.insert(id.clone(), Arc::clone(&callback)).is_none() {
                state.order.push(id.clone());
            }
            match state.root {
                Some(root) if state.running => self
                    .candidates(root)
                    .into_iter()
                    .filter(|el| state.seen.contains(el) && self.inner.document.is_connected(*el))
                    .collect(),
                _ => Vec::new(),
            }
        };
        debug!(feature = %id, replay = replay.len(), "Subscriber added");
        if !replay.is_empty() {
            notify(&id, &callback, &replay);
        }
    }

    /// Returns `false` when `id` was not subscribed.
    pub fn unsubscribe(&self, id: &FeatureId) -> bool {
        let mut state = self.inner.state.lock();
        let removed = state.subscribers.remove(id).is_some();
        state.order.retain(|other| other != id);
        if removed {
            debug!(feature = %id, "Subscriber removed");
        }
        removed
    }

    /// Installs the mutation observer and delivers every matching element already present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Dom`] when the watched root cannot be observed.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        let root = self.resolve_root();
        let weak = Arc::downgrade(&self.inner);
        let mutations = self
            .inner
            .document
            .observe(
                root,
                Arc::new(move |records: &[MutationRecord], _: &Document| {
                    if let Some(inner) = weak.upgrade() {
                        ElementObserver { inner }.on_mutations(records);
                    }
                }),
            )
            .context("Observing watch root")?;

        let initial = self.candidates(root);
        let (fresh, callbacks) = {
            let mut state = self.inner.state.lock();
            if state.running {
                // Another start won.
                drop(state);
                drop(mutations);
                return Ok(());
            }
            state.running = true;
            state.root = Some(root);
            state.mutations = Some(mutations);
            let fresh: Vec<ElementId> = initial.into_iter().filter(|el| state.seen.insert(*el)).collect();
            (fresh, state.callbacks())
        };

        info!(root = %root, initial = fresh.len(), "Element observer started");
        if !fresh.is_empty() {
            for (id, callback) in &callbacks {
                notify(id, callback, &fresh);
            }
        }
        Ok(())
    }

    /// Disconnects the mutation observer and cancels the in-flight debounce timer.
    ///
    /// Detection state is dropped; a later [`ElementObserver::start`] rescans.
    pub fn stop(&self) {
        let (mutations, timer) = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.generation = state.generation.wrapping_add(1);
            state.root = None;
            state.seen.clear();
            state.pending.clear();
            state.pending_set.clear();
            (state.mutations.take(), state.timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        drop(mutations);
        info!("Element observer stopped");
    }

    /// Matching elements in `scope`, the scope itself included, in document order.
    fn candidates(&self, scope: ElementId) -> Vec<ElementId> {
        let doc = &self.inner.document;
        let mut found = Vec::new();
        if doc.matches(scope, &self.inner.selector) {
            found.push(scope);
        }
        found.extend(doc.query_all(scope, &self.inner.selector));
        found
    }

    fn on_mutations(&self, records: &[MutationRecord]) {
        let doc = &self.inner.document;
        let mut added = Vec::new();
        let mut removals = false;
        for record in records {
            removals |= !record.removed.is_empty();
            for &node in &record.added {
                if doc.is_connected(node) {
                    added.extend(self.candidates(node));
                }
            }
        }

        let mut state = self.inner.state.lock();
        if !state.running {
            return;
        }
        if removals {
            // Moved nodes are connected again by now and keep their identity.
            let before = state.seen.len();
            state.seen.retain(|el| doc.is_connected(*el));
            let forgotten = before - state.seen.len();
            if forgotten > 0 {
                trace!(forgotten, "Forgot detached elements");
            }
        }
        let queued = added.into_iter().filter(|el| state.enqueue(*el)).count();
        if queued > 0 {
            trace!(queued, pending = state.pending.len(), "Elements pending");
        }
        if !state.pending.is_empty() && state.timer.is_none() {
            let generation = state.generation;
            let weak: Weak<ObserverInner> = Arc::downgrade(&self.inner);
            let debounce = self.inner.debounce;
            state.timer = Some(self.inner.handle.spawn(async move {
                tokio::time::sleep(debounce).await;
                if let Some(inner) = weak.upgrade() {
                    ElementObserver { inner }.deliver(generation);
                }
            }));
        }
    }

    fn deliver(&self, generation: u64) {
        let doc = &self.inner.document;
        let (batch, callbacks) = {
            let mut state = self.inner.state.lock();
            if state.generation != generation || !state.running {
                return;
            }
            state.timer = None;
            let pending = std::mem::take(&mut state.pending);
            state.pending_set.clear();
            let batch: Vec<ElementId> = pending
                .into_iter()
                .filter(|el| doc.is_connected(*el))
                .filter(|el| state.seen.insert(*el))
                .collect();
            if batch.is_empty() {
                return;
            }
            state.deliveries += 1;
            (batch, state.callbacks())
        };

        debug!(elements = batch.len(), subscribers = callbacks.len(), "Delivering detected elements");
        for (id, callback) in &callbacks {
            notify(id, callback, &batch);
        }
    }
}

/// Runs one subscriber; a panic is logged and contained to that subscriber.
fn notify(id: &FeatureId, callback: &ElementCallback, elements: &[ElementId]) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(elements))) {
        error!(
            feature = %id,
            panic = %EngineError::panic_message(payload.as_ref()),
            "Subscriber panicked during delivery"
        );
    }
}
