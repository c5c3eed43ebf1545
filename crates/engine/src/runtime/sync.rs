//! Cross-tab convergence: applies store changes made by any tab to the local active map.

use super::{FeatureRuntime, RuntimeInner, flag_value};
use crate::error::{EngineError, EngineErrorExt};
use reel_domain::constants::{SUSPEND_KEY, flag_id};
use reel_store::{StorageChange, StoreEvent};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, trace, warn};

impl FeatureRuntime {
    pub(super) fn spawn_sync(&self, mut events: broadcast::Receiver<StoreEvent>) {
        let weak: Weak<RuntimeInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Runtime sync lagged; reconciling");
                        StoreEvent::Resynced
                    },
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                FeatureRuntime { inner }.apply_event(&event).await;
            }
            debug!("Runtime sync stopped");
        });
        if let Some(previous) = self.inner.sync_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Retries [`FeatureRuntime::reconcile`] every `reconcile_retry` until one read
    /// succeeds. At most one retry loop runs per tab.
    pub(super) fn schedule_reconcile(&self) {
        let mut slot = self.inner.retry_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let weak: Weak<RuntimeInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.reconcile_retry();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match (FeatureRuntime { inner }).reconcile().await {
                    Ok(changed) => {
                        info!(changed, "Reconciled after a failed flag write");
                        break;
                    },
                    Err(e) => debug!(error = %e, "Store still unavailable; reconcile retried later"),
                }
            }
        }));
    }

    async fn apply_event(&self, event: &StoreEvent) {
        match event {
            StoreEvent::Changed(change) => self.apply_change(change).await,
            StoreEvent::Resynced => match self.reconcile().await {
                Ok(changed) => debug!(changed, "Reconciled after resync"),
                Err(e) => warn!(error = %e, "Reconcile after resync failed"),
            },
        }
    }

    async fn apply_change(&self, change: &StorageChange) {
        if change.key == SUSPEND_KEY {
            let suspended = change.new_value.as_ref().and_then(Value::as_bool).unwrap_or(false);
            if suspended != self.is_suspended() {
                info!(suspended, "Suspend flag changed; reloading");
                if let Err(e) = self.reload().await {
                    error!(error = %e, "Reload after suspend change failed");
                }
            }
            return;
        }

        let Some(id) = flag_id(&change.key) else {
            return;
        };
        let Some(descriptor) = self.inner.registry.get(id.as_str()) else {
            trace!(feature = %id, "Flag of an unregistered feature changed");
            return;
        };
        if !self.is_initialized() || self.is_suspended() {
            return;
        }

        let desired =
            change.new_value.as_ref().and_then(Value::as_bool).unwrap_or(descriptor.options.default_enabled);
        if desired == self.is_feature_enabled(id.as_str()) {
            trace!(feature = %id, desired, "Flag change already applied");
            return;
        }

        let result = if descriptor.options.traits.reloads_on_toggle() {
            info!(feature = %id, desired, "Flag changed; reloading");
            self.reload().await
        } else if desired {
            self.enable_feature(id.as_str(), false).await
        } else {
            self.disable_feature(id.as_str(), false).await
        };
        if let Err(e) = result {
            warn!(feature = %id, desired, error = %e, "Applying flag change failed");
        }
    }

    /// Re-reads every flag and the suspend key and aligns the active map with them.
    /// Returns how many features changed state.
    ///
    /// Used after lost change events or failed writes; a no-op before initialization.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] when the bulk read fails; nothing changes then.
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let _transition = self.inner.transitions.lock().await;
        if !self.is_initialized() {
            return Ok(0);
        }

        self.inner.store.clear_cache();
        let descriptors = self.inner.registry.by_priority();
        let values = self.read_flags(&descriptors).await.context("Reconcile read")?;

        let suspended = values.get(SUSPEND_KEY).and_then(Value::as_bool).unwrap_or(false);
        if suspended != self.is_suspended() {
            let before = self.active_features();
            self.teardown_locked();
            self.initialize_locked().await?;
            let after = self.active_features();
            let changed = before.iter().filter(|id| !after.contains(id)).count()
                + after.iter().filter(|id| !before.contains(id)).count();
            return Ok(changed);
        }
        if suspended {
            return Ok(0);
        }

        let mut changed = 0;
        for descriptor in &descriptors {
            let desired = flag_value(&values, descriptor);
            if desired == self.is_feature_enabled(descriptor.id.as_str()) {
                continue;
            }
            let result = if desired {
                self.activate(descriptor)
            } else {
                let removed = self.inner.active.lock().remove(&descriptor.id);
                if let Some(active) = removed {
                    self.deactivate(&descriptor.id, active);
                }
                Ok(())
            };
            match result {
                Ok(()) => changed += 1,
                Err(e) => warn!(feature = %descriptor.id, error = %e, "Reconcile could not enable feature"),
            }
        }
        Ok(changed)
    }
}
