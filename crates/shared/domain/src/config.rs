use serde::Deserialize;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration shared by every tab of a process.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReelConfigInner {
    pub runtime: RuntimeSettings,
    pub store: StoreSettings,
    pub log: LogSettings,
}

/// Thin Arc-wrapped config for inexpensive cloning into subsystems.
#[derive(Default, Debug, Clone, Deserialize)]
pub struct ReelConfig {
    #[serde(flatten, default)]
    inner: Arc<ReelConfigInner>,
}

impl Deref for ReelConfig {
    type Target = ReelConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ReelConfig {
    fn deref_mut(&mut self) -> &mut ReelConfigInner {
        Arc::make_mut(&mut self.inner)
    }
}

/// Detection and lifecycle knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Fixed coalescing window for detection bursts.
    pub debounce_ms: u64,
    /// Selector of the elements features attach to.
    pub video_selector: String,
    /// Selector of the observed subtree; the document body when it does not match.
    pub watch_root: String,
    /// Delay between reconcile attempts after a flag write failed.
    pub reconcile_retry_ms: u64,
}

impl RuntimeSettings {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn reconcile_retry(&self) -> Duration {
        Duration::from_millis(self.reconcile_retry_ms)
    }
}

/// Per-tab store cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub cache_ttl_ms: u64,
    pub cache_capacity: u64,
}

impl StoreSettings {
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    /// Rolling log files are written here when set.
    pub directory: Option<PathBuf>,
}

// --- Default ---

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            video_selector: "video".to_owned(),
            watch_root: "#feed".to_owned(),
            reconcile_retry_ms: 1_000,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { cache_ttl_ms: 5_000, cache_capacity: 1_024 }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_owned(), json: false, directory: None }
    }
}
