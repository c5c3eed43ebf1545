//! Persisted key layout shared by every tab.

use crate::features::FeatureId;

/// Prefix of the per-feature enabled flag: `feature_state:<id> -> bool`.
pub const FEATURE_STATE_PREFIX: &str = "feature_state:";
/// Prefix of per-feature preference namespaces: `feature_pref:<id>:<name>`.
pub const FEATURE_PREF_PREFIX: &str = "feature_pref:";
/// Global kill switch, independent of the individual feature flags.
pub const SUSPEND_KEY: &str = "global:suspended";

/// Class of the per-element flex container owned by the controls layout.
pub const CONTROLS_CONTAINER_CLASS: &str = "reel-controls";
/// Attribute carrying the slot name on every control placed in a container.
pub const SLOT_ATTRIBUTE: &str = "data-reel-slot";
/// Attribute carrying the owning feature id on nodes injected by a feature.
pub const FEATURE_ATTRIBUTE: &str = "data-reel-feature";

/// Storage key of the enabled flag for `id`.
pub fn flag_key(id: &FeatureId) -> String {
    format!("{FEATURE_STATE_PREFIX}{id}")
}

/// Reverse of [`flag_key`]; `None` for keys outside the flag namespace.
pub fn flag_id(key: &str) -> Option<FeatureId> {
    key.strip_prefix(FEATURE_STATE_PREFIX).and_then(FeatureId::parse)
}

/// Store namespace holding free-form preferences of `id`.
pub fn pref_namespace(id: &FeatureId) -> String {
    format!("{FEATURE_PREF_PREFIX}{id}")
}
