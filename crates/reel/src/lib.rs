//! Facade crate for Reel: re-exports the engine, its infrastructure and the
//! built-in features, and registers the latter in one call.
//! Keep this crate thin: it composes other crates and implements nothing itself.
//!
//! ## Usage
//! - Build a [`FeatureRuntime`] over a [`dom::Document`] and a [`store::KeyValueStore`].
//! - Call [`install_builtin`] on its registry, then `initialize().await`.

pub use reel_dom as dom;
pub use reel_domain as domain;
pub use reel_engine as engine;
pub use reel_engine::{
    ElementFeature, EngineError, Feature, FeatureContext, FeatureOptions, FeatureRegistry, FeatureRuntime,
};
pub use reel_events as events;
pub use reel_kernel as kernel;
pub use reel_store as store;

/// Built-in features compiled into this build.
pub mod features {
    #[cfg(feature = "download")]
    pub use reel_download as download;
    #[cfg(feature = "focus-mode")]
    pub use reel_focus_mode as focus_mode;
    #[cfg(feature = "playback-speed")]
    pub use reel_playback_speed as playback_speed;

    /// Ids of the built-in features enabled by Cargo feature.
    pub const ENABLED: &[&str] = &[
        #[cfg(feature = "focus-mode")]
        reel_focus_mode::ID,
        #[cfg(feature = "playback-speed")]
        reel_playback_speed::ID,
        #[cfg(feature = "download")]
        reel_download::ID,
    ];

    #[must_use]
    pub fn is_enabled(id: &str) -> bool {
        ENABLED.contains(&id)
    }
}

/// Registers every built-in feature compiled into this build.
///
/// # Errors
///
/// Returns [`EngineError::Registration`] if one of the ids is already taken.
#[cfg_attr(
    not(any(feature = "focus-mode", feature = "playback-speed", feature = "download")),
    allow(unused_variables)
)]
pub fn install_builtin(registry: &FeatureRegistry) -> Result<(), EngineError> {
    #[cfg(feature = "focus-mode")]
    reel_focus_mode::register(registry)?;
    #[cfg(feature = "playback-speed")]
    reel_playback_speed::register(registry)?;
    #[cfg(feature = "download")]
    reel_download::register(registry)?;

    Ok(())
}
