use crate::area::StorageArea;
use crate::engine::{KeyValueStore, StoreInner};
use crate::error::StoreError;
use moka::sync::Cache;
use parking_lot::Mutex;
use private::Sealed;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::debug;

/// Values are cached briefly; change events invalidate them sooner.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_CAPACITY: u64 = 1_024;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoreConfig {
    cache_ttl: Duration,
    cache_capacity: u64,
    event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
pub struct NoArea;
#[derive(Debug)]
pub struct WithArea(Arc<dyn StorageArea>);

mod private {
    pub(super) trait Sealed {}
}
impl Sealed for NoArea {}
impl Sealed for WithArea {}

#[allow(private_bounds)]
#[derive(Debug, Default)]
pub struct StoreBuilder<S: Sealed = NoArea> {
    state: S,
    config: StoreConfig,
}

#[allow(private_bounds)]
impl<S: Sealed> StoreBuilder<S> {
    #[must_use = "Sets how long cached values stay valid"]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    #[must_use = "Sets the maximum number of cached keys"]
    pub const fn cache_capacity(mut self, capacity: u64) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    #[must_use = "Sets the buffer of the store event stream"]
    pub const fn change_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    fn transition<N: Sealed>(self, state: N) -> StoreBuilder<N> {
        StoreBuilder { state, config: self.config }
    }
}

impl StoreBuilder<NoArea> {
    #[must_use = "Creates a new store builder with default configuration"]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Sets the storage area backing the store"]
    pub fn area(self, area: impl StorageArea) -> StoreBuilder<WithArea> {
        self.transition(WithArea(Arc::new(area)))
    }

    #[must_use = "Sets a shared storage area backing the store"]
    pub fn area_arc(self, area: Arc<dyn StorageArea>) -> StoreBuilder<WithArea> {
        self.transition(WithArea(area))
    }
}

impl StoreBuilder<WithArea> {
    /// Builds the store and starts forwarding area changes on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`] when called outside a Tokio runtime, and
    /// [`StoreError::Internal`] for a zero event capacity.
    pub fn connect(self) -> Result<KeyValueStore, StoreError> {
        let handle = Handle::try_current().map_err(|e| StoreError::NoRuntime {
            message: e.to_string().into(),
            context: Some("KeyValueStore::connect".into()),
        })?;
        if self.config.event_capacity == 0 {
            return Err(StoreError::Internal {
                message: "event capacity must be >= 1".into(),
                context: None,
            });
        }

        let area = self.state.0;
        let changes = area.changes();
        let (events, _) = broadcast::channel(self.config.event_capacity);
        let cache = Cache::builder()
            .max_capacity(self.config.cache_capacity)
            .time_to_live(self.config.cache_ttl)
            .build();

        let inner = Arc::new(StoreInner {
            area,
            cache,
            epoch: AtomicU64::new(0),
            events,
            handle: handle.clone(),
            forwarder: Mutex::new(None),
        });
        let task = handle.spawn(StoreInner::forward(Arc::downgrade(&inner), changes));
        *inner.forwarder.lock() = Some(task);

        debug!(
            ttl_ms = self.config.cache_ttl.as_millis(),
            capacity = self.config.cache_capacity,
            "Key-value store connected"
        );
        Ok(KeyValueStore { inner })
    }
}
