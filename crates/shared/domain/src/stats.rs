use crate::features::FeatureId;
use serde::{Deserialize, Serialize};

/// Snapshot exposed to the settings surface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub registered: usize,
    pub active: usize,
    pub observer_active: bool,
    pub suspended: bool,
}

/// Emitted whenever a feature becomes active or inactive in a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStateChanged {
    pub id: FeatureId,
    pub active: bool,
}
