//! Composition root of one tab: owns the active feature map and drives every transition.

mod builder;
mod sync;

pub use builder::FeatureRuntimeBuilder;

use crate::error::{EngineError, EngineErrorExt};
use crate::feature::{ElementFeature, Feature, FeatureContext, FeatureInstance, FeatureOptions};
use crate::layout::ControlsLayout;
use crate::observer::{ElementCallback, ElementObserver};
use crate::registry::{FeatureDescriptor, FeatureRegistry};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use reel_domain::config::RuntimeSettings;
use reel_domain::constants::{SUSPEND_KEY, flag_key};
use reel_domain::features::FeatureId;
use reel_domain::stats::{FeatureStateChanged, RuntimeStats};
use reel_dom::{Document, ElementId};
use reel_store::KeyValueStore;
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffer of the [`FeatureStateChanged`] stream.
pub const STATE_EVENT_CAPACITY: usize = 64;

struct ActiveFeature {
    instance: FeatureInstance,
}

pub(crate) struct RuntimeInner {
    registry: FeatureRegistry,
    store: KeyValueStore,
    document: Document,
    observer: ElementObserver,
    layout: ControlsLayout,
    settings: RuntimeSettings,
    active: Mutex<FxHashMap<FeatureId, ActiveFeature>>,
    suspended: AtomicBool,
    initialized: AtomicBool,
    state_events: broadcast::Sender<FeatureStateChanged>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes initialize, reload, reconcile and shutdown.
    transitions: tokio::sync::Mutex<()>,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        for task in [self.sync_task.get_mut().take(), self.retry_task.get_mut().take()].into_iter().flatten() {
            task.abort();
        }
    }
}

/// Enables, disables and re-synchronizes features of one tab.
///
/// Cheap to clone. Feature state converges across tabs through the shared store:
/// every tab applies remote flag changes only when they differ from its local
/// active state.
#[derive(Clone)]
pub struct FeatureRuntime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for FeatureRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRuntime").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

impl FeatureRuntime {
    #[must_use = "Creates a new runtime builder"]
    pub fn builder() -> FeatureRuntimeBuilder {
        FeatureRuntimeBuilder::default()
    }

    /// Adds a page-wide feature; chainable.
    ///
    /// Registering after [`FeatureRuntime::initialize`] does not evaluate the new
    /// feature until the next reload or an explicit enable.
    ///
    /// # Errors
    ///
    /// See [`FeatureRegistry::register`].
    pub fn register<F, T>(&self, id: &str, factory: F, options: FeatureOptions) -> Result<&Self, EngineError>
    where
        F: Fn(FeatureContext) -> Result<T, EngineError> + Send + Sync + 'static,
        T: Feature,
    {
        self.inner.registry.register(id, factory, options)?;
        Ok(self)
    }

    /// Adds an element feature; chainable.
    ///
    /// # Errors
    ///
    /// See [`FeatureRegistry::register_element`].
    pub fn register_element<F, T>(&self, id: &str, factory: F, options: FeatureOptions) -> Result<&Self, EngineError>
    where
        F: Fn(FeatureContext) -> Result<T, EngineError> + Send + Sync + 'static,
        T: ElementFeature,
    {
        self.inner.registry.register_element(id, factory, options)?;
        Ok(self)
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.inner.store
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    pub fn layout(&self) -> &ControlsLayout {
        &self.inner.layout
    }

    pub fn observer(&self) -> &ElementObserver {
        &self.inner.observer
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    /// Reads every flag plus the suspend key in one round trip and enables the
    /// features that are on, highest priority first.
    ///
    /// Calling it again while initialized does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] when the bulk read fails; no feature is
    /// active afterwards. Failures of single features are logged and skipped.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let _transition = self.inner.transitions.lock().await;
        self.initialize_locked().await
    }

    async fn initialize_locked(&self) -> Result<(), EngineError> {
        if self.inner.initialized.load(Ordering::Acquire) {
            debug!("Runtime already initialized");
            return Ok(());
        }

        // Subscribe before reading so no change between the two is lost.
        let events = self.inner.sync_task.lock().is_none().then(|| self.inner.store.subscribe());

        let descriptors = self.inner.registry.by_priority();
        let values = self.read_flags(&descriptors).await.context("Initial flag read")?;
        let suspended = values.get(SUSPEND_KEY).and_then(Value::as_bool).unwrap_or(false);
        self.inner.suspended.store(suspended, Ordering::Release);
        self.inner.initialized.store(true, Ordering::Release);
        if let Some(events) = events {
            self.spawn_sync(events);
        }

        if suspended {
            info!(registered = descriptors.len(), "Runtime suspended; no feature activated");
            return Ok(());
        }

        let mut enabled = 0usize;
        for descriptor in &descriptors {
            if !flag_value(&values, descriptor) {
                continue;
            }
            match self.activate(descriptor) {
                Ok(()) => enabled += 1,
                Err(e) => warn!(feature = %descriptor.id, error = %e, "Feature failed to start"),
            }
        }
        info!(registered = descriptors.len(), enabled, "Runtime initialized");
        Ok(())
    }

    /// One bulk read of every flag (defaulted per descriptor) and the suspend key.
    async fn read_flags(
        &self,
        descriptors: &[Arc<FeatureDescriptor>],
    ) -> Result<FxHashMap<String, Value>, reel_store::StoreError> {
        let mut defaults: Vec<(String, Value)> = descriptors
            .iter()
            .map(|d| (flag_key(&d.id), Value::Bool(d.options.default_enabled)))
            .collect();
        defaults.push((SUSPEND_KEY.to_owned(), Value::Bool(false)));
        self.inner.store.get_multiple(defaults).await
    }

    /// Activates `id` unless it is active already; persists `true` when `persist` is set.
    ///
    /// While suspended nothing is activated and only the flag is written.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownFeature`], [`EngineError::Activation`] (the feature stays
    /// off and nothing is persisted) or [`EngineError::Persistence`]. After a failed
    /// write the feature stays on until a reconcile reaches the store again.
    pub async fn enable_feature(&self, id: &str, persist: bool) -> Result<(), EngineError> {
        let descriptor = self.inner.registry.get(id).ok_or_else(|| EngineError::unknown(id))?;
        if self.is_suspended() {
            debug!(feature = %descriptor.id, "Suspended; enable only updates the flag");
        } else if !self.is_feature_enabled(id) {
            self.activate(&descriptor)?;
        }
        if persist {
            self.persist_flag(&descriptor.id, true).await?;
        }
        Ok(())
    }

    /// Tears `id` down before returning; persists `false` when `persist` is set.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownFeature`] or [`EngineError::Persistence`]. After a failed
    /// write the feature stays off until a reconcile reaches the store again.
    pub async fn disable_feature(&self, id: &str, persist: bool) -> Result<(), EngineError> {
        let descriptor = self.inner.registry.get(id).ok_or_else(|| EngineError::unknown(id))?;
        let removed = self.inner.active.lock().remove(id);
        if let Some(active) = removed {
            self.deactivate(&descriptor.id, active);
        }
        if persist {
            self.persist_flag(&descriptor.id, false).await?;
        }
        Ok(())
    }

    /// Flips `id` and persists the new state; returns it.
    ///
    /// Not atomic across concurrent callers; the last write wins everywhere.
    ///
    /// # Errors
    ///
    /// As [`FeatureRuntime::enable_feature`] and [`FeatureRuntime::disable_feature`].
    /// When the write fails the local transition is undone before the error returns.
    pub async fn toggle_feature(&self, id: &str) -> Result<bool, EngineError> {
        let descriptor = self.inner.registry.get(id).ok_or_else(|| EngineError::unknown(id))?;
        let current = if self.is_suspended() {
            self.inner
                .store
                .get(&flag_key(&descriptor.id), descriptor.options.default_enabled)
                .await
                .context("Reading flag to toggle")?
        } else {
            self.is_feature_enabled(id)
        };
        let result = if current {
            self.disable_feature(id, true).await
        } else {
            self.enable_feature(id, true).await
        };
        match result {
            Ok(()) => Ok(!current),
            Err(e @ EngineError::Persistence { .. }) => {
                self.revert_toggle(id, current).await;
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    /// Restores the local state `toggle_feature` started from.
    async fn revert_toggle(&self, id: &str, enabled: bool) {
        if self.is_suspended() {
            return;
        }
        let reverted = if enabled {
            self.enable_feature(id, false).await
        } else {
            self.disable_feature(id, false).await
        };
        match reverted {
            Ok(()) => info!(feature = %id, enabled, "Toggle not persisted; local state restored"),
            Err(e) => warn!(feature = %id, enabled, error = %e, "Could not restore state after a failed toggle"),
        }
    }

    /// Whether `id` is active in this tab right now.
    pub fn is_feature_enabled(&self, id: &str) -> bool {
        self.inner.active.lock().contains_key(id)
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Ids of the active features, highest priority first.
    pub fn active_features(&self) -> Vec<FeatureId> {
        let order = self.inner.registry.by_priority();
        let active = self.inner.active.lock();
        order.into_iter().filter(|d| active.contains_key(&d.id)).map(|d| d.id.clone()).collect()
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            registered: self.inner.registry.len(),
            active: self.inner.active.lock().len(),
            observer_active: self.inner.observer.is_running(),
            suspended: self.is_suspended(),
        }
    }

    /// Stream of activations and deactivations of this tab.
    pub fn state_events(&self) -> broadcast::Receiver<FeatureStateChanged> {
        self.inner.state_events.subscribe()
    }

    /// Writes the global suspend flag and reloads when it changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] when the write or the reload read fails.
    pub async fn set_suspended(&self, suspended: bool) -> Result<(), EngineError> {
        self.inner.store.set(SUSPEND_KEY, &suspended).await.context("Writing suspend flag")?;
        if suspended != self.is_suspended() {
            self.reload().await?;
        }
        Ok(())
    }

    /// Tears every feature down and initializes again from the store.
    ///
    /// # Errors
    ///
    /// See [`FeatureRuntime::initialize`].
    pub async fn reload(&self) -> Result<(), EngineError> {
        let _transition = self.inner.transitions.lock().await;
        let torn = self.teardown_locked();
        info!(torn_down = torn, "Reloading runtime");
        self.initialize_locked().await
    }

    /// Stops syncing and tears every feature down. Flags are left untouched.
    pub async fn shutdown(&self) {
        let _transition = self.inner.transitions.lock().await;
        let tasks = [self.inner.sync_task.lock().take(), self.inner.retry_task.lock().take()];
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        let torn = self.teardown_locked();
        info!(torn_down = torn, "Runtime shut down");
    }

    fn context(&self, id: &FeatureId) -> FeatureContext {
        FeatureContext {
            id: id.clone(),
            document: self.inner.document.clone(),
            layout: self.inner.layout.clone(),
            store: self.inner.store.clone(),
            content_root: self.inner.observer.resolve_root(),
        }
    }

    fn activate(&self, descriptor: &FeatureDescriptor) -> Result<(), EngineError> {
        let id = &descriptor.id;
        let options = descriptor.options;
        let ctx = self.context(id);
        let instance = match catch_unwind(AssertUnwindSafe(|| (descriptor.factory)(ctx))) {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => {
                return Err(EngineError::Activation {
                    message: e.to_string().into(),
                    context: Some(format!("feature {id}").into()),
                });
            },
            Err(payload) => {
                return Err(EngineError::Activation {
                    message: EngineError::panic_message(payload.as_ref()).into(),
                    context: Some(format!("feature {id} panicked in its factory").into()),
                });
            },
        };

        {
            let mut active = self.inner.active.lock();
            if active.contains_key(id) {
                drop(active);
                debug!(feature = %id, "Concurrent activation won; discarding instance");
                contained_cleanup(id, instance.feature());
                return Ok(());
            }
            active.insert(id.clone(), ActiveFeature { instance: instance.clone() });
        }

        let started = match &instance {
            FeatureInstance::Element(feature) => {
                self.inner.observer.subscribe(id.clone(), element_callback(id.clone(), feature));
                self.inner.observer.start()
            },
            FeatureInstance::Page(feature) => run_scan(id, feature.as_ref()),
        };
        if let Err(e) = started {
            if let Some(active) = self.inner.active.lock().remove(id) {
                self.release(id, &active);
            }
            return Err(e);
        }

        info!(feature = %id, priority = options.priority, "Feature enabled");
        let _ = self.inner.state_events.send(FeatureStateChanged { id: id.clone(), active: true });
        Ok(())
    }

    fn deactivate(&self, id: &FeatureId, active: ActiveFeature) {
        self.release(id, &active);
        info!(feature = %id, "Feature disabled");
        let _ = self.inner.state_events.send(FeatureStateChanged { id: id.clone(), active: false });
    }

    /// Unsubscribes and cleans up an instance already removed from the active map.
    fn release(&self, id: &FeatureId, active: &ActiveFeature) {
        if active.instance.handles_elements() {
            self.inner.observer.unsubscribe(id);
            if self.inner.observer.subscriber_count() == 0 {
                self.inner.observer.stop();
            }
        }
        contained_cleanup(id, active.instance.feature());
    }

    /// Deactivates everything, lowest priority first, and stops detection.
    fn teardown_locked(&self) -> usize {
        let order = self.inner.registry.by_priority();
        let mut torn = 0;
        for descriptor in order.iter().rev() {
            let removed = self.inner.active.lock().remove(&descriptor.id);
            if let Some(active) = removed {
                self.deactivate(&descriptor.id, active);
                torn += 1;
            }
        }
        self.inner.observer.stop();
        self.inner.layout.prune();
        self.inner.initialized.store(false, Ordering::Release);
        torn
    }

    /// Writes the flag of `id`; a failed write schedules a reconcile.
    async fn persist_flag(&self, id: &FeatureId, enabled: bool) -> Result<(), EngineError> {
        let result = self.inner.store.set(&flag_key(id), &enabled).await;
        if let Err(e) = &result {
            warn!(feature = %id, enabled, error = %e, "Flag write failed; reconciling once the store answers");
            self.schedule_reconcile();
        }
        result.context(format!("Persisting flag of {id}"))
    }
}

/// Persisted flag of `descriptor`, or its default when absent or not a boolean.
fn flag_value(values: &FxHashMap<String, Value>, descriptor: &FeatureDescriptor) -> bool {
    values.get(&flag_key(&descriptor.id)).and_then(Value::as_bool).unwrap_or(descriptor.options.default_enabled)
}

/// Hands detected elements to `instance` one by one, containing errors and panics
/// per element.
fn element_callback(id: FeatureId, instance: &Arc<dyn ElementFeature>) -> ElementCallback {
    let weak = Arc::downgrade(instance);
    Arc::new(move |elements: &[ElementId]| {
        let Some(feature) = weak.upgrade() else {
            return;
        };
        for &element in elements {
            match catch_unwind(AssertUnwindSafe(|| feature.process_element(element))) {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(feature = %id, element = %element, error = %e, "Element processing failed"),
                Err(payload) => error!(
                    feature = %id,
                    element = %element,
                    panic = %EngineError::panic_message(payload.as_ref()),
                    "Feature panicked while processing an element"
                ),
            }
        }
    })
}

fn run_scan(id: &FeatureId, feature: &dyn Feature) -> Result<(), EngineError> {
    match catch_unwind(AssertUnwindSafe(|| feature.scan())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(EngineError::Activation {
            message: e.to_string().into(),
            context: Some(format!("scan of {id}").into()),
        }),
        Err(payload) => Err(EngineError::Activation {
            message: EngineError::panic_message(payload.as_ref()).into(),
            context: Some(format!("scan of {id} panicked").into()),
        }),
    }
}

fn contained_cleanup(id: &FeatureId, feature: &dyn Feature) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| feature.cleanup())) {
        error!(
            feature = %id,
            panic = %EngineError::panic_message(payload.as_ref()),
            "Feature panicked during cleanup"
        );
    }
}
