//! Per-element attach and detach bookkeeping shared by element features.

use crate::error::{EngineError, EngineErrorExt};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use reel_domain::features::FeatureId;
use reel_dom::{Document, ElementId, MutationObserver, MutationRecord};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Undoes what a feature attached to one element.
pub type Teardown<T> = Box<dyn Fn(&Document, ElementId, T) + Send + Sync>;

struct LifecycleInner<T> {
    feature: FeatureId,
    document: Document,
    tracked: Mutex<FxHashMap<ElementId, T>>,
    teardown: Teardown<T>,
    observer: Mutex<Option<MutationObserver>>,
    cleaned: AtomicBool,
}

impl<T: Send + 'static> LifecycleInner<T> {
    /// Tears down every tracked element that left the document.
    fn reap(&self) -> usize {
        let gone: Vec<(ElementId, T)> = {
            let mut tracked = self.tracked.lock();
            let absent: Vec<ElementId> =
                tracked.keys().copied().filter(|el| !self.document.is_connected(*el)).collect();
            absent.into_iter().filter_map(|el| tracked.remove(&el).map(|data| (el, data))).collect()
        };
        let count = gone.len();
        for (el, data) in gone {
            trace!(feature = %self.feature, element = %el, "Element left the document");
            (self.teardown)(&self.document, el, data);
        }
        count
    }
}

/// Tracking table of one feature instance plus its single cleanup observer.
///
/// Every attach goes through [`ElementLifecycle::process_once`] or
/// [`ElementLifecycle::add_tracked`]; whenever the content subtree loses nodes, every
/// tracked element is re-checked and the absent ones are torn down. This type is
/// not a [`Feature`](crate::Feature); features own one.
pub struct ElementLifecycle<T> {
    inner: Arc<LifecycleInner<T>>,
}

impl<T> fmt::Debug for ElementLifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementLifecycle")
            .field("feature", &self.inner.feature)
            .field("tracked", &self.inner.tracked.lock().len())
            .field("cleaned", &self.inner.cleaned.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ElementLifecycle<T> {
    /// Starts watching `content_root` for removals.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Dom`] when `content_root` no longer exists.
    pub fn new<F>(
        feature: FeatureId,
        document: Document,
        content_root: ElementId,
        teardown: F,
    ) -> Result<Self, EngineError>
    where
        F: Fn(&Document, ElementId, T) + Send + Sync + 'static,
    {
        let inner = Arc::new(LifecycleInner {
            feature,
            document: document.clone(),
            tracked: Mutex::new(FxHashMap::default()),
            teardown: Box::new(teardown),
            observer: Mutex::new(None),
            cleaned: AtomicBool::new(false),
        });

        let weak: Weak<LifecycleInner<T>> = Arc::downgrade(&inner);
        let observer = document
            .observe(
                content_root,
                Arc::new(move |records: &[MutationRecord], _: &Document| {
                    if records.iter().all(|r| r.removed.is_empty()) {
                        return;
                    }
                    if let Some(inner) = weak.upgrade() {
                        inner.reap();
                    }
                }),
            )
            .context("Cleanup observer")?;
        *inner.observer.lock() = Some(observer);

        Ok(Self { inner })
    }

    pub fn feature(&self) -> &FeatureId {
        &self.inner.feature
    }

    pub fn is_tracked(&self, el: ElementId) -> bool {
        self.inner.tracked.lock().contains_key(&el)
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.tracked.lock().len()
    }

    pub fn tracked_elements(&self) -> Vec<ElementId> {
        self.inner.tracked.lock().keys().copied().collect()
    }

    /// Runs `f` on the payload of `el`. The table is locked meanwhile, so `f` must
    /// not call back into this lifecycle.
    pub fn with_tracked<R>(&self, el: ElementId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.tracked.lock().get_mut(&el).map(f)
    }

    /// Starts tracking `el`; returns the payload it replaced, if any.
    pub fn add_tracked(&self, el: ElementId, data: T) -> Option<T> {
        self.inner.tracked.lock().insert(el, data)
    }

    /// Stops tracking `el` without running its teardown.
    pub fn remove_tracked(&self, el: ElementId) -> Option<T> {
        self.inner.tracked.lock().remove(&el)
    }

    /// Stops tracking `el` and runs its teardown; `false` when it was not tracked.
    pub fn detach(&self, el: ElementId) -> bool {
        let Some(data) = self.remove_tracked(el) else {
            return false;
        };
        (self.inner.teardown)(&self.inner.document, el, data);
        true
    }

    /// Attaches to `el` unless it is already tracked, detached or the lifecycle is
    /// cleaned up. Returns whether `attach` ran successfully.
    ///
    /// # Errors
    ///
    /// Failures of `attach` are returned as [`EngineError::Processing`].
    pub fn process_once<F>(&self, el: ElementId, attach: F) -> Result<bool, EngineError>
    where
        F: FnOnce(&Document, ElementId) -> Result<T, EngineError>,
    {
        if self.is_cleaned() || self.is_tracked(el) || !self.inner.document.is_connected(el) {
            return Ok(false);
        }

        let data = attach(&self.inner.document, el).map_err(|e| match e {
            EngineError::Processing { .. } => e,
            other => EngineError::Processing {
                message: other.to_string().into(),
                context: Some(format!("feature {}, element {el}", self.inner.feature).into()),
            },
        })?;

        // `attach` may have re-entered; keep the newest payload, tear down the other.
        if let Some(previous) = self.add_tracked(el, data) {
            (self.inner.teardown)(&self.inner.document, el, previous);
        }
        trace!(feature = %self.inner.feature, element = %el, "Element attached");
        Ok(true)
    }

    /// Tears down absent elements now instead of waiting for the next mutation batch.
    pub fn reap(&self) -> usize {
        self.inner.reap()
    }

    pub fn is_cleaned(&self) -> bool {
        self.inner.cleaned.load(Ordering::Acquire)
    }

    /// Disconnects the cleanup observer, tears down every tracked element exactly
    /// once and runs `on_cleanup`. Later calls do nothing and return `0`.
    pub fn cleanup(&self, on_cleanup: impl FnOnce()) -> usize {
        if self.inner.cleaned.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let observer = self.inner.observer.lock().take();
        drop(observer);

        let drained: Vec<(ElementId, T)> = self.inner.tracked.lock().drain().collect();
        let count = drained.len();
        for (el, data) in drained {
            (self.inner.teardown)(&self.inner.document, el, data);
        }
        on_cleanup();
        debug!(feature = %self.inner.feature, torn_down = count, "Lifecycle cleaned up");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn lifecycle(doc: &Document, root: ElementId, torn: &Arc<AtomicUsize>) -> ElementLifecycle<ElementId> {
        let torn = Arc::clone(torn);
        ElementLifecycle::new(
            FeatureId::parse("test").unwrap(),
            doc.clone(),
            root,
            move |doc: &Document, _el: ElementId, marker: ElementId| {
                let _ = doc.remove(marker);
                torn.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap()
    }

    #[test]
    fn process_once_is_idempotent() {
        let doc = Document::new();
        let video = doc.append_element(doc.body(), "video").unwrap();
        let torn = Arc::new(AtomicUsize::new(0));
        let lifecycle = lifecycle(&doc, doc.body(), &torn);

        let attach = |doc: &Document, el: ElementId| -> Result<ElementId, EngineError> {
            let parent = doc.parent(el).ok_or("no parent")?;
            doc.append_element(parent, "span").context("marker")
        };
        assert!(lifecycle.process_once(video, attach).unwrap());
        assert!(!lifecycle.process_once(video, attach).unwrap());
        assert_eq!(doc.query_all(doc.body(), &reel_dom::Selector::parse("span").unwrap()).len(), 1);
    }

    #[test]
    fn attach_failures_become_processing_errors() {
        let doc = Document::new();
        let video = doc.append_element(doc.body(), "video").unwrap();
        let torn = Arc::new(AtomicUsize::new(0));
        let lifecycle = lifecycle(&doc, doc.body(), &torn);

        let err = lifecycle.process_once(video, |_, _| Err(EngineError::from("boom"))).unwrap_err();
        assert!(matches!(err, EngineError::Processing { .. }));
        assert!(!lifecycle.is_tracked(video));
    }

    #[test]
    fn removed_elements_are_torn_down_on_flush() {
        let doc = Document::new();
        let feed = doc.append_element(doc.body(), "div").unwrap();
        let video = doc.append_element(feed, "video").unwrap();
        let torn = Arc::new(AtomicUsize::new(0));
        let lifecycle = lifecycle(&doc, doc.body(), &torn);
        let marker = doc.append_element(doc.body(), "span").unwrap();
        lifecycle.add_tracked(video, marker);

        doc.remove(feed).unwrap();
        doc.flush();

        assert_eq!(torn.load(Ordering::SeqCst), 1);
        assert!(!lifecycle.is_tracked(video));
        assert!(!doc.is_connected(marker));
    }
}
