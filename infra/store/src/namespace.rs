use crate::engine::KeyValueStore;
use crate::error::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceName(String);

impl TryFrom<String> for NamespaceName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, StoreError> {
        Self::try_from(value.as_str())
    }
}

impl TryFrom<&str> for NamespaceName {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, StoreError> {
        let name = value.to_lowercase();

        if name.is_empty() {
            return Err(StoreError::InvalidKey {
                message: "EMPTY".into(),
                context: Some("Namespace cannot be empty".into()),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':')) {
            return Err(StoreError::InvalidKey {
                message: name.into(),
                context: Some("Namespace contains illegal characters".into()),
            });
        }

        Ok(Self(name))
    }
}

impl NamespaceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NamespaceName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scoped view of a [`KeyValueStore`] whose keys are stored as `<namespace>:<key>`.
///
/// Shares the cache and change stream of the parent store; cloning is cheap.
#[derive(Debug, Clone)]
pub struct NamespacedStore {
    store: KeyValueStore,
    namespace: Arc<NamespaceName>,
}

impl NamespacedStore {
    pub(crate) fn new(store: KeyValueStore, namespace: NamespaceName) -> Self {
        Self { store, namespace: Arc::new(namespace) }
    }

    pub fn name(&self) -> &str {
        self.namespace.as_str()
    }

    /// Full key of `key` in the parent store.
    pub fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// # Errors
    ///
    /// See [`KeyValueStore::get`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
        self.store.get(&self.key(key), default).await
    }

    /// # Errors
    ///
    /// See [`KeyValueStore::get_raw`].
    pub async fn get_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.store.get_raw(&self.key(key)).await
    }

    /// # Errors
    ///
    /// See [`KeyValueStore::set`].
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.store.set(&self.key(key), value).await
    }

    /// # Errors
    ///
    /// See [`KeyValueStore::remove`].
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(&self.key(key)).await
    }

    /// Strips this namespace from a full key; `None` when it belongs elsewhere.
    pub fn strip<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key.strip_prefix(self.namespace.as_str())?.strip_prefix(':')
    }
}
