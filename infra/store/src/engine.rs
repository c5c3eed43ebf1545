//! The per-tab [`KeyValueStore`] handle: cached reads, write-through invalidation
//! and the change-event stream.

use crate::area::{StorageArea, StorageChange};
use crate::builder::{NoArea, StoreBuilder};
use crate::error::{StoreError, StoreErrorExt};
use crate::namespace::{NamespaceName, NamespacedStore};
use fxhash::FxHashMap;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Longest accepted key, in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// What subscribers of a [`KeyValueStore`] observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A key changed in the shared area, from this tab or another one.
    Changed(Arc<StorageChange>),
    /// Change events were lost; the cache was dropped and state must be re-read.
    Resynced,
}

pub(crate) struct StoreInner {
    pub(crate) area: Arc<dyn StorageArea>,
    /// `None` caches a confirmed absence.
    pub(crate) cache: Cache<String, Option<Value>>,
    /// Bumped by every invalidation; reads that raced one are not cached.
    pub(crate) epoch: AtomicU64,
    pub(crate) events: broadcast::Sender<StoreEvent>,
    pub(crate) handle: Handle,
    pub(crate) forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl StoreInner {
    fn invalidate(&self, key: &str) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate(key);
    }

    fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }

    fn cache_if_current(&self, epoch: u64, entries: impl IntoIterator<Item = (String, Option<Value>)>) {
        if self.epoch.load(Ordering::Acquire) != epoch {
            trace!("Skipping cache fill: invalidated during read");
            return;
        }
        let keys: Vec<String> = entries
            .into_iter()
            .map(|(key, value)| {
                self.cache.insert(key.clone(), value);
                key
            })
            .collect();
        // An invalidation may have slipped in between the check and the inserts.
        if self.epoch.load(Ordering::Acquire) != epoch {
            for key in keys {
                self.cache.invalidate(&key);
            }
        }
    }

    pub(crate) fn forward(weak: Weak<Self>, mut changes: broadcast::Receiver<Arc<StorageChange>>) -> impl Future<Output = ()> + Send {
        async move {
            loop {
                let received = changes.recv().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match received {
                    Ok(change) => {
                        inner.invalidate(&change.key);
                        trace!(key = %change.key, "Change forwarded");
                        let _ = inner.events.send(StoreEvent::Changed(change));
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Store change stream lagged; dropping cache");
                        inner.invalidate_all();
                        let _ = inner.events.send(StoreEvent::Resynced);
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Store change forwarding stopped");
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.get_mut().take() {
            task.abort();
        }
    }
}

/// A thread-safe handle to one tab's view of the shared storage area.
///
/// * **Cached reads**: values (and absences) are cached for a short TTL; any local
///   write and any change event invalidates the key immediately.
/// * **Batched reads**: [`KeyValueStore::get_multiple`] resolves every cache miss
///   in a single round trip.
/// * **Change events**: every change in the area, including this tab's own writes,
///   is re-published through [`KeyValueStore::subscribe`].
///
/// Consistency is eventual and last-writer-wins; reads observe this tab's own
/// writes, not necessarily those of other tabs. The handle is cheap to clone.
#[derive(Clone)]
pub struct KeyValueStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("area", &self.inner.area)
            .field("cached", &self.inner.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl KeyValueStore {
    #[must_use = "Creates a new store builder"]
    pub fn builder() -> StoreBuilder<NoArea> {
        StoreBuilder::new()
    }

    /// Reads `key`, falling back to `default` when it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unreachable`] when the area fails, and
    /// [`StoreError::Serialization`] when the stored value does not decode into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
        match self.get_raw(key).await? {
            Some(value) => serde_json::from_value(value).context(format!("Decoding '{key}'")),
            None => Ok(default),
        }
    }

    /// Reads the raw JSON value of `key`; `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] or [`StoreError::Unreachable`].
    pub async fn get_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        if let Some(cached) = self.inner.cache.get(key) {
            trace!(key, "Cache hit");
            return Ok(cached);
        }

        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let mut found = self.inner.area.get_many(vec![key.to_owned()]).await.context(format!("Reading '{key}'"))?;
        let value = found.remove(key);
        self.inner.cache_if_current(epoch, [(key.to_owned(), value.clone())]);
        Ok(value)
    }

    /// Resolves every key of `defaults`, substituting the default for absent keys.
    ///
    /// Cached keys are answered locally; all misses share exactly one round trip.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] or [`StoreError::Unreachable`].
    pub async fn get_multiple(
        &self,
        defaults: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<FxHashMap<String, Value>, StoreError> {
        let mut resolved = FxHashMap::default();
        let mut misses = Vec::new();

        for (key, default) in defaults {
            validate_key(&key)?;
            match self.inner.cache.get(&key) {
                Some(cached) => {
                    resolved.insert(key, cached.unwrap_or(default));
                },
                None => misses.push((key, default)),
            }
        }
        trace!(hits = resolved.len(), misses = misses.len(), "Bulk read");
        if misses.is_empty() {
            return Ok(resolved);
        }

        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let keys: Vec<String> = misses.iter().map(|(k, _)| k.clone()).collect();
        let mut found = self.inner.area.get_many(keys).await.context("Bulk read")?;

        let mut fill = Vec::with_capacity(misses.len());
        for (key, default) in misses {
            let value = found.remove(&key);
            fill.push((key.clone(), value.clone()));
            resolved.insert(key, value.unwrap_or(default));
        }
        self.inner.cache_if_current(epoch, fill);
        Ok(resolved)
    }

    /// Writes `value` under `key` and invalidates the cached entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`], [`StoreError::Serialization`],
    /// [`StoreError::Unreachable`] or [`StoreError::QuotaExceeded`].
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        validate_key(key)?;
        let value = serde_json::to_value(value).context(format!("Encoding '{key}'"))?;
        self.inner.invalidate(key);
        let result = self.inner.area.set_many(vec![(key.to_owned(), value)]).await;
        // The write may have landed even if the call failed.
        self.inner.invalidate(key);
        result.context(format!("Writing '{key}'"))
    }

    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] or [`StoreError::Unreachable`].
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.inner.invalidate(key);
        let result = self.inner.area.remove(vec![key.to_owned()]).await;
        self.inner.invalidate(key);
        result.context(format!("Removing '{key}'"))
    }

    /// Drops the cached entry of `key`.
    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    pub fn clear_cache(&self) {
        self.inner.invalidate_all();
    }

    /// Raw event stream; lagging receivers see `RecvError::Lagged` and should resync.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Runs `callback` for every store event on a spawned task until the returned
    /// handle is removed or dropped.
    pub fn add_change_listener<F>(&self, callback: F) -> ChangeListener
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let mut events = self.subscribe();
        let task = self.inner.handle.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Change listener lagged");
                        callback(&StoreEvent::Resynced);
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        ChangeListener { task: Some(task) }
    }

    /// Scoped view whose keys are prefixed with `<name>:`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for empty names or names with characters
    /// outside `[a-z0-9_:-]`.
    pub fn namespace(&self, name: &str) -> Result<NamespacedStore, StoreError> {
        let name = NamespaceName::try_from(name)?;
        Ok(NamespacedStore::new(self.clone(), name))
    }
}

/// Registration returned by [`KeyValueStore::add_change_listener`].
#[derive(Debug)]
pub struct ChangeListener {
    task: Option<JoinHandle<()>>,
}

impl ChangeListener {
    /// Unregisters the callback; no event is delivered after this returns.
    pub fn remove(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.abort();
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey { message: "EMPTY".into(), context: None });
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidKey {
            message: format!("{} bytes", key.len()).into(),
            context: Some(format!("Keys are limited to {MAX_KEY_LEN} bytes").into()),
        });
    }
    Ok(())
}
