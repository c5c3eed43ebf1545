//! Shared per-element control containers with a fixed slot order.

use crate::error::{EngineError, EngineErrorExt};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use reel_domain::constants::{CONTROLS_CONTAINER_CLASS, SLOT_ATTRIBUTE};
use reel_domain::slots::Slot;
use reel_dom::{Document, DomError, ElementId};
use std::collections::BTreeMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct ContainerEntry {
    container: ElementId,
    controls: BTreeMap<Slot, ElementId>,
}

struct LayoutInner {
    document: Document,
    containers: Mutex<FxHashMap<ElementId, ContainerEntry>>,
}

/// Places controls of independent features side by side next to an element.
///
/// One `div.reel-controls` flex container is created lazily in the element's
/// parent; each control gets the CSS `order` of its [`Slot`], so the visual order
/// does not depend on which feature registered first.
#[derive(Clone)]
pub struct ControlsLayout {
    inner: Arc<LayoutInner>,
}

impl fmt::Debug for ControlsLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlsLayout").field("containers", &self.len()).finish()
    }
}

impl ControlsLayout {
    pub fn new(document: Document) -> Self {
        Self { inner: Arc::new(LayoutInner { document, containers: Mutex::new(FxHashMap::default()) }) }
    }

    /// Puts `control` into the container of `element` at `slot` and returns the container.
    ///
    /// A slot that is already taken is handed to the newer control; the previous one
    /// is detached. When `element` moved to another parent since its container was
    /// created, the container moves along.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Dom`] when `element` has no parent or either node is stale.
    pub fn register_element(
        &self,
        element: ElementId,
        slot: Slot,
        control: ElementId,
    ) -> Result<ElementId, EngineError> {
        let doc = &self.inner.document;
        let parent = doc.parent(element).ok_or_else(|| EngineError::Dom {
            source: DomError::HierarchyRequest {
                message: "element has no parent to host controls".into(),
                context: None,
            },
            context: Some(format!("element {element}").into()),
        })?;

        doc.set_style(control, "order", &slot.order().to_string()).context("Slot order")?;
        doc.set_attribute(control, SLOT_ATTRIBUTE, slot.as_str()).context("Slot attribute")?;

        let (container, displaced) = {
            let mut containers = self.inner.containers.lock();
            // A container follows its element into a new parent, controls included.
            if let Some(entry) = containers.get(&element)
                && doc.parent(entry.container) != Some(parent)
            {
                doc.insert_before(parent, entry.container, None).context("Moving container")?;
                debug!(element = %element, container = %entry.container, "Controls container moved");
            }
            let entry = match containers.entry(element) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(vacant) => {
                    let container = doc.create_element("div");
                    doc.add_class(container, CONTROLS_CONTAINER_CLASS).context("Container class")?;
                    doc.set_style(container, "display", "flex").context("Container style")?;
                    doc.insert_before(parent, container, None).context("Inserting container")?;
                    debug!(element = %element, container = %container, "Controls container created");
                    vacant.insert(ContainerEntry { container, controls: BTreeMap::new() })
                }
            };
            let displaced = entry.controls.insert(slot, control).filter(|old| *old != control);
            (entry.container, displaced)
        };

        if let Some(old) = displaced {
            warn!(element = %element, slot = slot.as_str(), "Slot claimed twice; replacing the earlier control");
            let _ = doc.remove(old);
        }
        doc.append_child(container, control).context("Placing control")?;
        trace!(element = %element, slot = slot.as_str(), "Control registered");
        Ok(container)
    }

    /// Removes the control at `slot`; an emptied container is removed as well.
    /// Returns `false` when nothing was registered there.
    pub fn unregister_element(&self, element: ElementId, slot: Slot) -> bool {
        let doc = &self.inner.document;
        let (control, emptied) = {
            let mut containers = self.inner.containers.lock();
            let Some(entry) = containers.get_mut(&element) else {
                return false;
            };
            let Some(control) = entry.controls.remove(&slot) else {
                return false;
            };
            let emptied = if entry.controls.is_empty() {
                containers.remove(&element).map(|e| e.container)
            } else {
                None
            };
            (control, emptied)
        };

        let _ = doc.remove(control);
        if let Some(container) = emptied {
            let _ = doc.remove(container);
            debug!(element = %element, "Controls container emptied");
        }
        true
    }

    /// Drops the whole container of `element` with every control in it.
    pub fn remove_container(&self, element: ElementId) -> bool {
        let Some(entry) = self.inner.containers.lock().remove(&element) else {
            return false;
        };
        let _ = self.inner.document.remove(entry.container);
        debug!(element = %element, controls = entry.controls.len(), "Controls container removed");
        true
    }

    /// Drops containers whose element left the document.
    pub fn prune(&self) -> usize {
        let doc = &self.inner.document;
        let gone: Vec<ElementId> = {
            let mut containers = self.inner.containers.lock();
            let absent: Vec<ElementId> =
                containers.keys().copied().filter(|el| !doc.is_connected(*el)).collect();
            absent.into_iter().filter_map(|el| containers.remove(&el)).map(|e| e.container).collect()
        };
        for container in &gone {
            let _ = doc.remove(*container);
        }
        gone.len()
    }

    pub fn container_for(&self, element: ElementId) -> Option<ElementId> {
        self.inner.containers.lock().get(&element).map(|e| e.container)
    }

    pub fn control(&self, element: ElementId, slot: Slot) -> Option<ElementId> {
        self.inner.containers.lock().get(&element).and_then(|e| e.controls.get(&slot).copied())
    }

    pub fn len(&self) -> usize {
        self.inner.containers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
