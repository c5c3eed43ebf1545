//! Tab-bus surface of the runtime: commands executed by each tab and the settings client
//! that issues them.

use crate::error::{EngineError, EngineErrorExt};
use crate::runtime::FeatureRuntime;
use reel_domain::constants::{SUSPEND_KEY, flag_key};
use reel_domain::features::FeatureId;
use reel_events::{Message, MessageKind, OriginPattern, TabEndpoint, TabId};
use reel_store::KeyValueStore;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payload of the feature commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCommand {
    pub id: String,
}

impl FeatureCommand {
    fn message(kind: MessageKind, id: &FeatureId) -> Result<Message, EngineError> {
        Message::with_payload(kind, &Self { id: id.to_string() }).context("Encoding feature command")
    }
}

/// Executes bus commands addressed to one tab until dropped or stopped.
///
/// The channel keeps its runtime alive.
#[derive(Debug)]
pub struct ControlChannel {
    tab: TabId,
    task: Option<JoinHandle<()>>,
}

impl ControlChannel {
    /// Must be called inside a Tokio runtime.
    pub fn spawn(runtime: FeatureRuntime, mut endpoint: TabEndpoint) -> Self {
        let tab = endpoint.id();
        let task = tokio::spawn(async move {
            while let Some(message) = endpoint.recv().await {
                if let Err(e) = execute(&runtime, &message).await {
                    warn!(tab = %tab, kind = %message.kind, error = %e, "Bus command failed");
                }
            }
            debug!(tab = %tab, "Control channel closed");
        });
        info!(tab = %tab, "Control channel listening");
        Self { tab, task: Some(task) }
    }

    pub const fn tab(&self) -> TabId {
        self.tab
    }

    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Applies one bus command to `runtime`. Enable and disable never write the flag;
/// the sender already did.
///
/// # Errors
///
/// Returns [`EngineError::Bus`] for undecodable payloads, otherwise whatever the
/// runtime operation returns.
pub async fn execute(runtime: &FeatureRuntime, message: &Message) -> Result<(), EngineError> {
    debug!(kind = %message.kind, sender = ?message.sender, "Executing bus command");
    match message.kind {
        MessageKind::EnableFeature => {
            let command: FeatureCommand = message.payload().context("Enable command")?;
            runtime.enable_feature(&command.id, false).await
        },
        MessageKind::DisableFeature => {
            let command: FeatureCommand = message.payload().context("Disable command")?;
            runtime.disable_feature(&command.id, false).await
        },
        MessageKind::ToggleFeature => {
            let command: FeatureCommand = message.payload().context("Toggle command")?;
            runtime.toggle_feature(&command.id).await.map(|_| ())
        },
        MessageKind::Reload => runtime.reload().await,
        MessageKind::Ping => {
            info!(sender = ?message.sender, stats = ?runtime.stats(), "Ping");
            Ok(())
        },
    }
}

/// The settings side: persists flags and tells every matching tab to apply them.
#[derive(Debug)]
pub struct SettingsClient {
    store: KeyValueStore,
    endpoint: TabEndpoint,
    tabs: OriginPattern,
}

impl SettingsClient {
    pub fn new(store: KeyValueStore, endpoint: TabEndpoint, tabs: OriginPattern) -> Self {
        Self { store, endpoint, tabs }
    }

    fn parse(id: &str) -> Result<FeatureId, EngineError> {
        FeatureId::parse(id).ok_or_else(|| EngineError::unknown(id))
    }

    /// Stored flag of `id`, `default` when it was never written.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownFeature`] for malformed ids or [`EngineError::Persistence`].
    pub async fn is_feature_enabled(&self, id: &str, default: bool) -> Result<bool, EngineError> {
        let id = Self::parse(id)?;
        self.store.get(&flag_key(&id), default).await.context("Reading feature flag")
    }

    /// Writes the flag of `id`, then broadcasts the matching command. Returns the
    /// number of tabs reached.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownFeature`] for malformed ids or [`EngineError::Persistence`];
    /// nothing is broadcast after a failed write.
    pub async fn set_feature_enabled(&self, id: &str, enabled: bool) -> Result<usize, EngineError> {
        let id = Self::parse(id)?;
        self.store.set(&flag_key(&id), &enabled).await.context("Writing feature flag")?;
        let kind = if enabled { MessageKind::EnableFeature } else { MessageKind::DisableFeature };
        let delivered = self.endpoint.send(&self.tabs, FeatureCommand::message(kind, &id)?);
        debug!(feature = %id, enabled, delivered, "Feature flag published");
        Ok(delivered)
    }

    /// Flips the stored flag of `id` and returns the new value.
    ///
    /// # Errors
    ///
    /// See [`SettingsClient::set_feature_enabled`].
    pub async fn toggle_feature(&self, id: &str, default: bool) -> Result<bool, EngineError> {
        let enabled = !self.is_feature_enabled(id, default).await?;
        self.set_feature_enabled(id, enabled).await?;
        Ok(enabled)
    }

    /// Writes the global suspend flag; tabs pick it up through their store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`].
    pub async fn set_suspended(&self, suspended: bool) -> Result<(), EngineError> {
        self.store.set(SUSPEND_KEY, &suspended).await.context("Writing suspend flag")
    }

    pub fn request_reload(&self) -> usize {
        self.endpoint.send(&self.tabs, Message::new(MessageKind::Reload))
    }

    pub fn ping(&self) -> usize {
        self.endpoint.send(&self.tabs, Message::new(MessageKind::Ping))
    }
}
