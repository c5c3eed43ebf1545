//! The [`Document`] arena: element storage, tree mutation, queries, listeners and
//! mutation delivery.
//!
//! Mutations are applied immediately, while observer records are queued and only
//! delivered by [`Document::flush`], the in-process equivalent of a microtask
//! checkpoint. Callbacks always run without the arena lock held, so they are free
//! to query and mutate the document.

use crate::error::DomError;
use crate::node::{ElementId, EventHandler, Listener, ListenerId, Node, Slot};
use crate::observer::{MutationCallback, MutationObserver, MutationRecord, ObserverEntry, ObserverId};
use crate::selector::Selector;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Upper bound of delivery rounds per flush; callbacks that keep mutating the
/// observed subtree get the rest on the next flush.
pub const MAX_FLUSH_ROUNDS: usize = 32;

pub(crate) struct DocumentInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: ElementId,
    head: ElementId,
    body: ElementId,
    pub(crate) observers: Vec<ObserverEntry>,
    next_observer: u64,
    next_listener: u64,
    flushing: bool,
}

/// A thread-safe handle to an element arena.
///
/// The handle is reference-counted and cheap to clone. A fresh document contains
/// `html > (head, body)`.
#[derive(Clone)]
pub struct Document {
    inner: Arc<Mutex<DocumentInner>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Document")
            .field("nodes", &inner.live_nodes())
            .field("observers", &inner.observers.len())
            .finish_non_exhaustive()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut inner = DocumentInner {
            slots: Vec::new(),
            free: Vec::new(),
            root: ElementId { index: 0, generation: 0 },
            head: ElementId { index: 0, generation: 0 },
            body: ElementId { index: 0, generation: 0 },
            observers: Vec::new(),
            next_observer: 0,
            next_listener: 0,
            flushing: false,
        };
        let root = inner.alloc(Node::new("html"));
        let head = inner.alloc(Node::new("head"));
        let body = inner.alloc(Node::new("body"));
        for child in [head, body] {
            if let Some(node) = inner.node_mut(child) {
                node.parent = Some(root);
            }
        }
        if let Some(node) = inner.node_mut(root) {
            node.children = vec![head, body];
        }
        inner.root = root;
        inner.head = head;
        inner.body = body;

        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    pub fn root(&self) -> ElementId {
        self.inner.lock().root
    }

    pub fn head(&self) -> ElementId {
        self.inner.lock().head
    }

    pub fn body(&self) -> ElementId {
        self.inner.lock().body
    }

    /// Number of live nodes, connected or not.
    pub fn node_count(&self) -> usize {
        self.inner.lock().live_nodes()
    }

    /// Number of connected mutation observers.
    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    // --- Tree ---

    /// Creates a detached element.
    pub fn create_element(&self, tag: &str) -> ElementId {
        self.inner.lock().alloc(Node::new(tag))
    }

    /// Creates an element and appends it to `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `parent` no longer exists.
    pub fn append_element(&self, parent: ElementId, tag: &str) -> Result<ElementId, DomError> {
        let mut inner = self.inner.lock();
        inner.node(parent).ok_or(DomError::stale(parent))?;
        let child = inner.alloc(Node::new(tag));
        inner.attach(parent, child, None)?;
        Ok(child)
    }

    /// Appends `child` to `parent`, moving it out of its current parent first.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] for dead ids and
    /// [`DomError::HierarchyRequest`] when the move would create a cycle or move the root.
    pub fn append_child(&self, parent: ElementId, child: ElementId) -> Result<(), DomError> {
        self.inner.lock().attach(parent, child, None)
    }

    /// Inserts `child` into `parent` before `reference`, or at the end when `None`.
    ///
    /// # Errors
    ///
    /// As [`Document::append_child`], plus [`DomError::NotFound`] when `reference`
    /// is not a child of `parent`.
    pub fn insert_before(
        &self,
        parent: ElementId,
        child: ElementId,
        reference: Option<ElementId>,
    ) -> Result<(), DomError> {
        self.inner.lock().attach(parent, child, reference)
    }

    /// Detaches `el` (with its subtree) from its parent; a no-op for detached elements.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn remove(&self, el: ElementId) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let node = inner.node(el).ok_or(DomError::stale(el))?;
        if el == inner.root {
            return Err(DomError::hierarchy("the document root cannot be removed"));
        }
        if node.parent.is_some() {
            inner.detach(el);
        }
        Ok(())
    }

    pub fn parent(&self, el: ElementId) -> Option<ElementId> {
        self.inner.lock().node(el).and_then(|n| n.parent)
    }

    pub fn children(&self, el: ElementId) -> Vec<ElementId> {
        self.inner.lock().node(el).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn exists(&self, el: ElementId) -> bool {
        self.inner.lock().node(el).is_some()
    }

    /// Whether `el` is alive and reachable from the document root.
    pub fn is_connected(&self, el: ElementId) -> bool {
        let inner = self.inner.lock();
        inner.is_connected(el)
    }

    /// Inclusive ancestry test.
    pub fn contains(&self, ancestor: ElementId, el: ElementId) -> bool {
        self.inner.lock().is_inclusive_ancestor(ancestor, el)
    }

    /// Frees every node that is not reachable from the root.
    ///
    /// Ids held elsewhere for those nodes become stale. Returns the number of freed nodes.
    pub fn sweep(&self) -> usize {
        // Freed listeners may own document handles; drop them after unlocking.
        let freed = {
            let mut inner = self.inner.lock();
            let mut freed = Vec::new();
            for index in 0..inner.slots.len() {
                let Some(id) = inner.id_at(index) else {
                    continue;
                };
                if !inner.is_connected(id) {
                    freed.push(inner.release(id));
                }
            }
            freed
        };
        if !freed.is_empty() {
            debug!(count = freed.len(), "Swept detached nodes");
        }
        freed.len()
    }

    // --- Attributes, classes, styles, text ---

    pub fn tag(&self, el: ElementId) -> Option<String> {
        self.inner.lock().node(el).map(|n| n.tag.clone())
    }

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn set_attribute(&self, el: ElementId, name: &str, value: &str) -> Result<(), DomError> {
        self.with_node_mut(el, |n| {
            n.attributes.insert(name.to_ascii_lowercase(), value.to_owned());
        })
    }

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn remove_attribute(&self, el: ElementId, name: &str) -> Result<(), DomError> {
        self.with_node_mut(el, |n| {
            n.attributes.remove(&name.to_ascii_lowercase());
        })
    }

    pub fn attribute(&self, el: ElementId, name: &str) -> Option<String> {
        self.inner.lock().node(el).and_then(|n| n.attributes.get(&name.to_ascii_lowercase()).cloned())
    }

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn add_class(&self, el: ElementId, class: &str) -> Result<(), DomError> {
        self.with_node_mut(el, |n| {
            n.classes.insert(class.to_owned());
        })
    }

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn remove_class(&self, el: ElementId, class: &str) -> Result<(), DomError> {
        self.with_node_mut(el, |n| {
            n.classes.remove(class);
        })
    }

    pub fn has_class(&self, el: ElementId, class: &str) -> bool {
        self.inner.lock().node(el).is_some_and(|n| n.classes.contains(class))
    }

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn set_style(&self, el: ElementId, property: &str, value: &str) -> Result<(), DomError> {
        self.with_node_mut(el, |n| {
            n.styles.insert(property.to_owned(), value.to_owned());
        })
    }

    pub fn style(&self, el: ElementId, property: &str) -> Option<String> {
        self.inner.lock().node(el).and_then(|n| n.styles.get(property).cloned())
    }

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn set_text(&self, el: ElementId, text: &str) -> Result<(), DomError> {
        self.with_node_mut(el, |n| text.clone_into(&mut n.text))
    }

    pub fn text(&self, el: ElementId) -> Option<String> {
        self.inner.lock().node(el).map(|n| n.text.clone())
    }

    /// Children of a flex container in rendering order: CSS `order`, then tree order.
    pub fn rendered_order(&self, container: ElementId) -> Vec<ElementId> {
        let inner = self.inner.lock();
        let Some(node) = inner.node(container) else {
            return Vec::new();
        };
        let mut children: Vec<(i32, ElementId)> = node
            .children
            .iter()
            .map(|&child| {
                let order = inner
                    .node(child)
                    .and_then(|n| n.styles.get("order"))
                    .and_then(|o| o.trim().parse().ok())
                    .unwrap_or(0);
                (order, child)
            })
            .collect();
        children.sort_by_key(|(order, _)| *order);
        children.into_iter().map(|(_, child)| child).collect()
    }

    // --- Queries ---

    /// Every descendant of `scope` (excluding `scope`) matching `selector`, in tree order.
    pub fn query_all(&self, scope: ElementId, selector: &Selector) -> Vec<ElementId> {
        let inner = self.inner.lock();
        let mut found = Vec::new();
        inner.walk_descendants(scope, &mut |id, node| {
            if selector.matches_node(node) {
                found.push(id);
            }
        });
        found
    }

    pub fn query(&self, scope: ElementId, selector: &Selector) -> Option<ElementId> {
        self.query_all(scope, selector).into_iter().next()
    }

    /// Parses `selector` and returns the first match in the whole document.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidSelector`] when the selector cannot be parsed.
    pub fn query_selector(&self, selector: &str) -> Result<Option<ElementId>, DomError> {
        let selector = Selector::parse(selector)?;
        Ok(self.query(self.root(), &selector))
    }

    pub fn matches(&self, el: ElementId, selector: &Selector) -> bool {
        self.inner.lock().node(el).is_some_and(|n| selector.matches_node(n))
    }

    // --- Listeners ---

    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn add_listener(
        &self,
        el: ElementId,
        event: &str,
        handler: EventHandler,
    ) -> Result<ListenerId, DomError> {
        let mut inner = self.inner.lock();
        inner.next_listener += 1;
        let id = ListenerId(inner.next_listener);
        let node = inner.node_mut(el).ok_or(DomError::stale(el))?;
        node.listeners.push(Listener { id, event: event.to_owned(), handler });
        Ok(id)
    }

    /// Returns `false` when the listener or the element is already gone.
    pub fn remove_listener(&self, el: ElementId, listener: ListenerId) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            inner.node_mut(el).and_then(|node| {
                let position = node.listeners.iter().position(|l| l.id == listener)?;
                Some(node.listeners.remove(position))
            })
        };
        removed.is_some()
    }

    pub fn listener_count(&self, el: ElementId) -> usize {
        self.inner.lock().node(el).map_or(0, |n| n.listeners.len())
    }

    /// Invokes every `event` handler of `el` in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `el` no longer exists.
    pub fn dispatch(&self, el: ElementId, event: &str) -> Result<usize, DomError> {
        let handlers: Vec<EventHandler> = {
            let inner = self.inner.lock();
            let node = inner.node(el).ok_or(DomError::stale(el))?;
            node.listeners.iter().filter(|l| l.event == event).map(|l| Arc::clone(&l.handler)).collect()
        };
        trace!(element = %el, event, handlers = handlers.len(), "Dispatching event");
        for handler in &handlers {
            handler(self, el);
        }
        Ok(handlers.len())
    }

    // --- Mutation observers ---

    /// Observes child-list changes in the subtree rooted at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::StaleElement`] when `target` no longer exists.
    pub fn observe(
        &self,
        target: ElementId,
        callback: MutationCallback,
    ) -> Result<MutationObserver, DomError> {
        let mut inner = self.inner.lock();
        inner.node(target).ok_or(DomError::stale(target))?;
        inner.next_observer += 1;
        let id = ObserverId(inner.next_observer);
        inner.observers.push(ObserverEntry { id, target, callback, queue: Vec::new() });
        trace!(observer = id.0, target = %target, "Mutation observer connected");
        Ok(MutationObserver { id, target, document: Arc::downgrade(&self.inner) })
    }

    pub fn has_pending_mutations(&self) -> bool {
        self.inner.lock().observers.iter().any(|o| !o.queue.is_empty())
    }

    /// Delivers queued records to their observers, repeating while callbacks queue more.
    ///
    /// Returns the number of callback invocations. A flush started from inside a
    /// callback returns `0`; its records are picked up by the outer flush.
    pub fn flush(&self) -> usize {
        {
            let mut inner = self.inner.lock();
            if inner.flushing {
                return 0;
            }
            inner.flushing = true;
        }
        let _guard = FlushGuard(self);

        let mut delivered = 0;
        for _ in 0..MAX_FLUSH_ROUNDS {
            let batches: Vec<(MutationCallback, Vec<MutationRecord>)> = {
                let mut inner = self.inner.lock();
                inner
                    .observers
                    .iter_mut()
                    .filter(|o| !o.queue.is_empty())
                    .map(|o| (Arc::clone(&o.callback), std::mem::take(&mut o.queue)))
                    .collect()
            };
            if batches.is_empty() {
                return delivered;
            }
            for (callback, records) in batches {
                callback(&records, self);
                delivered += 1;
            }
        }

        if self.has_pending_mutations() {
            warn!(rounds = MAX_FLUSH_ROUNDS, "Mutation delivery did not settle; deferring the rest");
        }
        delivered
    }

    fn with_node_mut(&self, el: ElementId, f: impl FnOnce(&mut Node)) -> Result<(), DomError> {
        let mut inner = self.inner.lock();
        let node = inner.node_mut(el).ok_or(DomError::stale(el))?;
        f(node);
        Ok(())
    }
}

struct FlushGuard<'a>(&'a Document);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.lock().flushing = false;
    }
}

impl DocumentInner {
    fn live_nodes(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    fn alloc(&mut self, node: Node) -> ElementId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return ElementId { index, generation: slot.generation };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot { generation: 0, node: Some(node) });
        ElementId { index, generation: 0 }
    }

    fn release(&mut self, id: ElementId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        let node = slot.node.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        node
    }

    fn id_at(&self, index: usize) -> Option<ElementId> {
        let slot = self.slots.get(index)?;
        slot.node.as_ref()?;
        Some(ElementId { index: u32::try_from(index).ok()?, generation: slot.generation })
    }

    fn node(&self, id: ElementId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, id: ElementId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn is_connected(&self, id: ElementId) -> bool {
        self.is_inclusive_ancestor(self.root, id)
    }

    fn is_inclusive_ancestor(&self, ancestor: ElementId, id: ElementId) -> bool {
        if self.node(ancestor).is_none() {
            return false;
        }
        let mut current = Some(id);
        while let Some(cursor) = current {
            if cursor == ancestor {
                return true;
            }
            current = self.node(cursor).and_then(|n| n.parent);
        }
        false
    }

    fn walk_descendants(&self, scope: ElementId, visit: &mut impl FnMut(ElementId, &Node)) {
        let mut stack: Vec<ElementId> = self
            .node(scope)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            visit(id, node);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    fn attach(
        &mut self,
        parent: ElementId,
        child: ElementId,
        reference: Option<ElementId>,
    ) -> Result<(), DomError> {
        self.node(parent).ok_or(DomError::stale(parent))?;
        self.node(child).ok_or(DomError::stale(child))?;
        if child == self.root {
            return Err(DomError::hierarchy("the document root cannot be moved"));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::hierarchy(format!(
                "{child} cannot be inserted into its own subtree"
            )));
        }
        if let Some(reference) = reference {
            let is_child = self.node(reference).is_some_and(|n| n.parent == Some(parent));
            if !is_child || reference == child {
                return Err(DomError::NotFound {
                    message: format!("{reference} is not a child of {parent}").into(),
                    context: None,
                });
            }
        }

        if self.node(child).is_some_and(|n| n.parent.is_some()) {
            self.detach(child);
        }

        let Some(node) = self.node_mut(parent) else {
            return Err(DomError::stale(parent));
        };
        let position = reference
            .and_then(|r| node.children.iter().position(|c| *c == r))
            .unwrap_or(node.children.len());
        node.children.insert(position, child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        self.record(MutationRecord { target: parent, added: vec![child], removed: Vec::new() });
        Ok(())
    }

    fn detach(&mut self, child: ElementId) {
        let Some(parent) = self.node(child).and_then(|n| n.parent) else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
        self.record(MutationRecord { target: parent, added: Vec::new(), removed: vec![child] });
    }

    fn record(&mut self, record: MutationRecord) {
        let interested: Vec<usize> = self
            .observers
            .iter()
            .enumerate()
            .filter(|(_, o)| self.is_inclusive_ancestor(o.target, record.target))
            .map(|(i, _)| i)
            .collect();
        for index in interested {
            self.observers[index].queue.push(record.clone());
        }
    }
}
