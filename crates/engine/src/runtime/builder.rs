use super::{FeatureRuntime, RuntimeInner, STATE_EVENT_CAPACITY};
use crate::error::EngineError;
use crate::layout::ControlsLayout;
use crate::observer::ElementObserver;
use crate::registry::FeatureRegistry;
use parking_lot::Mutex;
use reel_domain::config::RuntimeSettings;
use reel_dom::Document;
use reel_store::KeyValueStore;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;

/// Wires the services of one tab together.
#[derive(Debug, Default)]
pub struct FeatureRuntimeBuilder {
    document: Option<Document>,
    store: Option<KeyValueStore>,
    settings: Option<RuntimeSettings>,
    registry: Option<FeatureRegistry>,
}

impl FeatureRuntimeBuilder {
    #[must_use = "Sets the tab document"]
    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    #[must_use = "Sets the tab store"]
    pub fn store(mut self, store: KeyValueStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use = "Sets the detection settings"]
    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Starts from an existing registry instead of an empty one.
    #[must_use = "Sets the feature registry"]
    pub fn registry(mut self, registry: FeatureRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] when the document or store is missing or no
    /// Tokio runtime is running, and [`EngineError::Dom`] for invalid selectors.
    pub fn build(self) -> Result<FeatureRuntime, EngineError> {
        let document = self.document.ok_or_else(|| EngineError::Internal {
            message: "Document not provided".into(),
            context: Some("FeatureRuntime builder".into()),
        })?;
        let store = self.store.ok_or_else(|| EngineError::Internal {
            message: "KeyValueStore not provided".into(),
            context: Some("FeatureRuntime builder".into()),
        })?;
        let settings = self.settings.unwrap_or_default();

        let observer = ElementObserver::new(
            document.clone(),
            &settings.video_selector,
            &settings.watch_root,
            settings.debounce(),
        )?;
        let (state_events, _) = broadcast::channel(STATE_EVENT_CAPACITY);

        Ok(FeatureRuntime {
            inner: Arc::new(RuntimeInner {
                registry: self.registry.unwrap_or_default(),
                store,
                layout: ControlsLayout::new(document.clone()),
                document,
                observer,
                settings,
                active: Mutex::default(),
                suspended: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                state_events,
                sync_task: Mutex::new(None),
                retry_task: Mutex::new(None),
                transitions: tokio::sync::Mutex::new(()),
            }),
        })
    }
}
