#![allow(dead_code)]

use parking_lot::Mutex;
use reel_domain::constants::FEATURE_ATTRIBUTE;
use reel_domain::slots::Slot;
use reel_dom::{Document, ElementId, Selector};
use reel_engine::{
    ElementFeature, ElementLifecycle, EngineError, EngineErrorExt, Feature, FeatureContext,
    FeatureRuntime,
};
use reel_store::{KeyValueStore, MemoryArea};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Longer than the default debounce window.
pub const SETTLE: Duration = Duration::from_millis(250);

/// A document with a `#feed` container, like the host page.
pub fn page() -> (Document, ElementId) {
    let document = Document::new();
    let feed = document.append_element(document.body(), "div").unwrap();
    document.set_attribute(feed, "id", "feed").unwrap();
    (document, feed)
}

/// Appends `<div class="item"><video/></div>` to `feed`; returns `(item, video)`.
pub fn add_video(document: &Document, feed: ElementId) -> (ElementId, ElementId) {
    let item = document.append_element(feed, "div").unwrap();
    document.add_class(item, "item").unwrap();
    let video = document.append_element(item, "video").unwrap();
    (item, video)
}

pub fn count(document: &Document, selector: &str) -> usize {
    document.query_all(document.root(), &Selector::parse(selector).unwrap()).len()
}

pub fn store_over(area: &MemoryArea) -> KeyValueStore {
    KeyValueStore::builder().area(area.clone()).connect().unwrap()
}

pub struct Tab {
    pub document: Document,
    pub feed: ElementId,
    pub runtime: FeatureRuntime,
}

pub fn tab(area: &MemoryArea) -> Tab {
    let (document, feed) = page();
    let runtime =
        FeatureRuntime::builder().document(document.clone()).store(store_over(area)).build().unwrap();
    Tab { document, feed, runtime }
}

/// Delivers queued mutations, lets the debounce window and background tasks run,
/// then delivers whatever that produced.
pub async fn settle(document: &Document) {
    document.flush();
    tokio::time::sleep(SETTLE).await;
    document.flush();
}

/// Counters shared by every instance a factory creates.
#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub processed: AtomicUsize,
    pub torn_down: AtomicUsize,
    pub cleanups: AtomicUsize,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// Element feature placing one button per video into `slot`.
pub struct SlotButton {
    ctx: FeatureContext,
    slot: Slot,
    counters: Arc<Counters>,
    lifecycle: ElementLifecycle<ElementId>,
}

impl SlotButton {
    pub fn factory(
        slot: Slot,
        counters: &Arc<Counters>,
    ) -> impl Fn(FeatureContext) -> Result<Self, EngineError> + Send + Sync + 'static {
        let counters = Arc::clone(counters);
        move |ctx: FeatureContext| {
            counters.created.fetch_add(1, Ordering::SeqCst);
            let layout = ctx.layout.clone();
            let torn = Arc::clone(&counters);
            let lifecycle = ElementLifecycle::new(
                ctx.id.clone(),
                ctx.document.clone(),
                ctx.content_root,
                move |doc: &Document, video: ElementId, button: ElementId| {
                    if !layout.unregister_element(video, slot) {
                        let _ = doc.remove(button);
                    }
                    torn.torn_down.fetch_add(1, Ordering::SeqCst);
                },
            )?;
            Ok(Self { ctx, slot, counters: Arc::clone(&counters), lifecycle })
        }
    }
}

impl ElementFeature for SlotButton {
    fn process_element(&self, element: ElementId) -> Result<(), EngineError> {
        self.lifecycle.process_once(element, |doc, video| {
            let button = doc.create_element("button");
            doc.set_attribute(button, FEATURE_ATTRIBUTE, self.ctx.id.as_str()).context("Marking button")?;
            self.ctx.layout.register_element(video, self.slot, button)?;
            self.counters.processed.fetch_add(1, Ordering::SeqCst);
            Ok(button)
        })?;
        Ok(())
    }
}

impl Feature for SlotButton {
    fn cleanup(&self) {
        let counters = &self.counters;
        self.lifecycle.cleanup(|| {
            counters.cleanups.fetch_add(1, Ordering::SeqCst);
        });
    }
}

/// Page-wide feature adding a class to the body; records its activation order.
pub struct BodyClass {
    document: Document,
    class: String,
}

impl BodyClass {
    pub fn factory(
        order: &Arc<Mutex<Vec<String>>>,
    ) -> impl Fn(FeatureContext) -> Result<Self, EngineError> + Send + Sync + 'static {
        let order = Arc::clone(order);
        move |ctx: FeatureContext| {
            order.lock().push(ctx.id.to_string());
            Ok(Self { document: ctx.document.clone(), class: format!("with-{}", ctx.id) })
        }
    }
}

impl Feature for BodyClass {
    fn scan(&self) -> Result<(), EngineError> {
        self.document.add_class(self.document.body(), &self.class).context("Body class")
    }

    fn cleanup(&self) {
        let _ = self.document.remove_class(self.document.body(), &self.class);
    }
}

/// Feature whose one-shot scan always fails.
pub struct FailingScan;

impl Feature for FailingScan {
    fn scan(&self) -> Result<(), EngineError> {
        Err(EngineError::from("scan refused"))
    }

    fn cleanup(&self) {}
}

pub fn has_body_class(document: &Document, feature: &str) -> bool {
    document.has_class(document.body(), &format!("with-{feature}"))
}
