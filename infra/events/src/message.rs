use crate::error::{BusError, BusErrorExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use strum_macros::{AsRefStr, Display, EnumString};

static NEXT_TAB: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a connected tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(u64);

impl TabId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TAB.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// Type tag of a cross-tab message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MessageKind {
    EnableFeature,
    DisableFeature,
    ToggleFeature,
    Reload,
    Ping,
}

/// A fire-and-forget message: a type tag plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
    /// Set by [`TabEndpoint::send`](crate::TabEndpoint::send); the sender never receives its own message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<TabId>,
}

impl Message {
    pub const fn new(kind: MessageKind) -> Self {
        Self { kind, payload: Value::Null, sender: None }
    }

    /// # Errors
    ///
    /// Returns [`BusError::Payload`] when `payload` cannot be encoded as JSON.
    pub fn with_payload<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Self, BusError> {
        let payload = serde_json::to_value(payload).context("Encoding message payload")?;
        Ok(Self { kind, payload, sender: None })
    }

    /// # Errors
    ///
    /// Returns [`BusError::Payload`] when the payload does not decode into `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        T::deserialize(&self.payload).context(format!("Decoding '{}' payload", self.kind))
    }
}
