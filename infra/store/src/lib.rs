//! # Key-Value Store
//!
//! A per-tab handle over the remote storage area every tab shares.
//!
//! # Core Features
//!
//! - **Short-lived Cache**: Reads (including confirmed absences) are cached with a TTL.
//!   Local writes and change events from any tab invalidate the key at once.
//! - **Batched Reads**: [`KeyValueStore::get_multiple`] answers cached keys locally and
//!   fetches all misses in one round trip.
//! - **Change Events**: Every area change is re-published as a [`StoreEvent`]. A lagging
//!   change stream drops the whole cache and emits [`StoreEvent::Resynced`].
//! - **Namespaces**: [`NamespacedStore`] prefixes keys as `<namespace>:<key>`.
//!
//! # Examples
//!
//! ```rust
//! use reel_store::{KeyValueStore, MemoryArea, StoreError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), StoreError> {
//!     let store = KeyValueStore::builder().area(MemoryArea::new()).connect()?;
//!
//!     assert!(!store.get("feature:focus-mode", false).await?);
//!     store.set("feature:focus-mode", &true).await?;
//!     assert!(store.get("feature:focus-mode", false).await?);
//!
//!     let prefs = store.namespace("pref:playback-speed")?;
//!     prefs.set("rate", &1.5).await?;
//!     assert_eq!(store.get("pref:playback-speed:rate", 1.0).await?, 1.5);
//!     Ok(())
//! }
//! ```

mod area;
mod builder;
mod engine;
mod error;
mod namespace;

pub use area::{AreaFuture, DEFAULT_CHANGE_CAPACITY, MemoryArea, StorageArea, StorageChange};
pub use builder::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, DEFAULT_EVENT_CAPACITY, StoreBuilder};
pub use engine::{ChangeListener, KeyValueStore, MAX_KEY_LEN, StoreEvent};
pub use error::{StoreError, StoreErrorExt};
pub use namespace::{NamespaceName, NamespacedStore};
