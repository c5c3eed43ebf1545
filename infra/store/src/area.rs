//! The storage-area seam: the remote, cross-tab-shared backend a [`KeyValueStore`]
//! talks to, plus an in-memory implementation shared by simulated tabs.
//!
//! [`KeyValueStore`]: crate::KeyValueStore

use crate::error::StoreError;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

/// Boxed future returned by [`StorageArea`] operations.
pub type AreaFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Default buffer of the change stream of a [`MemoryArea`].
pub const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// A single key transition, delivered to every store attached to the area,
/// including the one that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Remote, eventually consistent, last-writer-wins key-value backend.
///
/// Every call is one round trip. Implementations must emit a [`StorageChange`]
/// for each key whose value actually changed.
pub trait StorageArea: fmt::Debug + Send + Sync + 'static {
    /// Values of the requested keys that exist; absent keys are omitted.
    fn get_many(&self, keys: Vec<String>) -> AreaFuture<'_, FxHashMap<String, Value>>;

    /// Writes all entries or none of them.
    fn set_many(&self, entries: Vec<(String, Value)>) -> AreaFuture<'_, ()>;

    fn remove(&self, keys: Vec<String>) -> AreaFuture<'_, ()>;

    fn changes(&self) -> broadcast::Receiver<Arc<StorageChange>>;
}

#[derive(Debug)]
struct MemoryInner {
    data: RwLock<FxHashMap<String, Value>>,
    changes: broadcast::Sender<Arc<StorageChange>>,
    latency_micros: AtomicU64,
    /// Zero means unlimited.
    quota_bytes: AtomicUsize,
    unreachable: AtomicBool,
    round_trips: AtomicU64,
}

/// In-process [`StorageArea`]; clones share the same data and change stream.
///
/// Latency, quota and reachability can be changed at any time to simulate a
/// slow, full or unavailable backend.
#[derive(Debug, Clone)]
pub struct MemoryArea {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryArea {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::with_change_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    pub fn with_change_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(MemoryInner {
                data: RwLock::new(FxHashMap::default()),
                changes,
                latency_micros: AtomicU64::new(0),
                quota_bytes: AtomicUsize::new(0),
                unreachable: AtomicBool::new(false),
                round_trips: AtomicU64::new(0),
            }),
        }
    }

    #[must_use = "Sets the simulated round-trip latency"]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    #[must_use = "Sets the storage quota in bytes"]
    pub fn with_quota(self, bytes: usize) -> Self {
        self.set_quota(Some(bytes));
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.inner.latency_micros.store(micros, Ordering::Relaxed);
    }

    pub fn set_quota(&self, bytes: Option<usize>) {
        self.inner.quota_bytes.store(bytes.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Completed and failed round trips since creation.
    pub fn round_trips(&self) -> u64 {
        self.inner.round_trips.load(Ordering::Relaxed)
    }

    /// Approximate stored size: serialized key and value lengths.
    pub fn used_bytes(&self) -> usize {
        self.inner.data.read().iter().map(|(k, v)| entry_size(k, v)).sum()
    }

    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.inner.data.read().clone()
    }

    async fn round_trip(&self, op: &'static str) -> Result<(), StoreError> {
        self.inner.round_trips.fetch_add(1, Ordering::Relaxed);
        let latency = Duration::from_micros(self.inner.latency_micros.load(Ordering::Relaxed));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.inner.unreachable.load(Ordering::Relaxed) {
            return Err(StoreError::Unreachable { message: op.into(), context: None });
        }
        Ok(())
    }

    fn emit(&self, changes: Vec<StorageChange>) {
        for change in changes {
            trace!(key = %change.key, "Storage area change");
            // No receivers is fine: nobody is attached yet.
            let _ = self.inner.changes.send(Arc::new(change));
        }
    }
}

impl StorageArea for MemoryArea {
    fn get_many(&self, keys: Vec<String>) -> AreaFuture<'_, FxHashMap<String, Value>> {
        Box::pin(async move {
            self.round_trip("get").await?;
            let data = self.inner.data.read();
            Ok(keys.into_iter().filter_map(|k| data.get(&k).cloned().map(|v| (k, v))).collect())
        })
    }

    fn set_many(&self, entries: Vec<(String, Value)>) -> AreaFuture<'_, ()> {
        Box::pin(async move {
            self.round_trip("set").await?;
            let changes = {
                let mut data = self.inner.data.write();
                let quota = self.inner.quota_bytes.load(Ordering::Relaxed);
                if quota > 0 {
                    let mut projected: usize = data.iter().map(|(k, v)| entry_size(k, v)).sum();
                    for (key, value) in &entries {
                        projected = (projected + entry_size(key, value))
                            .saturating_sub(data.get(key).map_or(0, |old| entry_size(key, old)));
                    }
                    if projected > quota {
                        return Err(StoreError::QuotaExceeded {
                            message: format!("{projected} of {quota} bytes").into(),
                            context: None,
                        });
                    }
                }

                let mut changes = Vec::new();
                for (key, value) in entries {
                    let old = data.insert(key.clone(), value.clone());
                    if old.as_ref() != Some(&value) {
                        changes.push(StorageChange { key, old_value: old, new_value: Some(value) });
                    }
                }
                changes
            };
            self.emit(changes);
            Ok(())
        })
    }

    fn remove(&self, keys: Vec<String>) -> AreaFuture<'_, ()> {
        Box::pin(async move {
            self.round_trip("remove").await?;
            let changes: Vec<StorageChange> = {
                let mut data = self.inner.data.write();
                keys.into_iter()
                    .filter_map(|key| {
                        let old = data.remove(&key)?;
                        Some(StorageChange { key, old_value: Some(old), new_value: None })
                    })
                    .collect()
            };
            self.emit(changes);
            Ok(())
        })
    }

    fn changes(&self) -> broadcast::Receiver<Arc<StorageChange>> {
        self.inner.changes.subscribe()
    }
}

fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}
