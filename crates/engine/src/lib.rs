//! # Feature engine
//!
//! Runs independently authored page features inside one tab of a host page whose
//! content is inserted continuously (an endless video feed):
//!
//! - [`FeatureRegistry`]: append-only table of feature descriptors.
//! - [`ElementObserver`]: one mutation observer over the content subtree; batches
//!   detected elements per debounce window and fans them out to every
//!   [`ElementFeature`].
//! - [`ElementLifecycle`]: per-feature tracking table that guarantees at most one
//!   attach per element and tears everything down when elements leave the page.
//! - [`ControlsLayout`]: shared per-element control containers ordered by [`Slot`].
//! - [`FeatureRuntime`]: composition root; enables features from persisted flags
//!   and keeps them converged with every other tab through the shared store.
//! - [`ControlChannel`] / [`SettingsClient`]: the same operations over the tab bus.
//!
//! ```no_run
//! # async fn run(document: reel_dom::Document, store: reel_store::KeyValueStore) -> Result<(), reel_engine::EngineError> {
//! use reel_engine::{Feature, FeatureOptions, FeatureRuntime};
//!
//! struct Noop;
//! impl Feature for Noop {
//!     fn cleanup(&self) {}
//! }
//!
//! let runtime = FeatureRuntime::builder().document(document).store(store).build()?;
//! runtime.register("noop", |_| Ok(Noop), FeatureOptions::default())?;
//! runtime.initialize().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Slot`]: reel_domain::slots::Slot

mod control;
mod error;
mod feature;
mod layout;
mod lifecycle;
mod observer;
mod registry;
mod runtime;

pub use control::{ControlChannel, FeatureCommand, SettingsClient, execute};
pub use error::{EngineError, EngineErrorExt};
pub use feature::{ElementFeature, Feature, FeatureContext, FeatureFactory, FeatureInstance, FeatureOptions};
pub use layout::ControlsLayout;
pub use lifecycle::{ElementLifecycle, Teardown};
pub use observer::{DEFAULT_DEBOUNCE, ElementCallback, ElementObserver, ObserverStats};
pub use registry::{FeatureDescriptor, FeatureRegistry};
pub use runtime::{FeatureRuntime, FeatureRuntimeBuilder, STATE_EVENT_CAPACITY};
