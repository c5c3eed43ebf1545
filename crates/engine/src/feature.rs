//! The closed contract between the runtime and independently authored features.

use crate::error::EngineError;
use crate::layout::ControlsLayout;
use reel_domain::constants::pref_namespace;
use reel_domain::features::{FeatureId, FeatureTraits};
use reel_dom::{Document, ElementId};
use reel_store::{KeyValueStore, NamespacedStore, StoreError};
use std::fmt;
use std::sync::Arc;
use typed_builder::TypedBuilder;

/// A unit of host-page modification that can be enabled and disabled independently.
///
/// Panics are caught by the runtime and reported as errors of this feature only.
pub trait Feature: Send + Sync + 'static {
    /// One-shot page-wide pass; the activation hook of features registered through
    /// [`FeatureRegistry::register`](crate::FeatureRegistry::register).
    ///
    /// # Errors
    ///
    /// A failing scan aborts activation and leaves the feature off.
    fn scan(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Removes every node, listener and global change the feature made. Must be
    /// safe to call more than once.
    fn cleanup(&self);
}

/// A feature that attaches to every detected element.
///
/// Registered through [`FeatureRegistry::register_element`](crate::FeatureRegistry::register_element)
/// with [`FeatureTraits::ELEMENT_EVENTS`]; [`Feature::scan`] is not called for it.
/// Implementations must be idempotent per element: the runtime may hand the same
/// element again (replays, restarts), and a feature that already tracks it must do
/// nothing.
pub trait ElementFeature: Feature {
    /// Attaches to one detected element.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Processing`] when the element cannot be handled; the
    /// remaining elements are still processed.
    fn process_element(&self, element: ElementId) -> Result<(), EngineError>;
}

/// Registration options of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct FeatureOptions {
    /// Higher values are evaluated first during initialization.
    #[builder(default)]
    pub priority: i32,
    /// State used when no flag has been persisted yet.
    #[builder(default = true)]
    pub default_enabled: bool,
    #[builder(default)]
    pub traits: FeatureTraits,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FeatureOptions {
    pub const fn wants_element_events(&self) -> bool {
        self.traits.wants_element_events()
    }
}

/// Services handed to a feature factory on every activation.
#[derive(Clone)]
pub struct FeatureContext {
    pub id: FeatureId,
    pub document: Document,
    pub layout: ControlsLayout,
    pub store: KeyValueStore,
    /// Root of the observed content subtree.
    pub content_root: ElementId,
}

impl FeatureContext {
    /// Preference store scoped to `feature_pref:<id>`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the namespace is rejected, which only
    /// happens for ids that bypassed validation.
    pub fn preferences(&self) -> Result<NamespacedStore, StoreError> {
        self.store.namespace(&pref_namespace(&self.id))
    }
}

impl fmt::Debug for FeatureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureContext")
            .field("id", &self.id)
            .field("content_root", &self.content_root)
            .finish_non_exhaustive()
    }
}

/// An activated feature, typed by the hooks it offers.
#[derive(Clone)]
pub enum FeatureInstance {
    Page(Arc<dyn Feature>),
    Element(Arc<dyn ElementFeature>),
}

impl FeatureInstance {
    pub fn feature(&self) -> &dyn Feature {
        match self {
            Self::Page(feature) => feature.as_ref(),
            Self::Element(feature) => feature.as_ref(),
        }
    }

    pub const fn handles_elements(&self) -> bool {
        matches!(self, Self::Element(_))
    }
}

impl fmt::Debug for FeatureInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.handles_elements() { "FeatureInstance::Element" } else { "FeatureInstance::Page" })
    }
}

/// Type-erased constructor stored by the registry.
pub type FeatureFactory =
    Arc<dyn Fn(FeatureContext) -> Result<FeatureInstance, EngineError> + Send + Sync>;

pub(crate) fn erase_page<F, T>(factory: F) -> FeatureFactory
where
    F: Fn(FeatureContext) -> Result<T, EngineError> + Send + Sync + 'static,
    T: Feature,
{
    Arc::new(move |ctx| factory(ctx).map(|feature| FeatureInstance::Page(Arc::new(feature))))
}

pub(crate) fn erase_element<F, T>(factory: F) -> FeatureFactory
where
    F: Fn(FeatureContext) -> Result<T, EngineError> + Send + Sync + 'static,
    T: ElementFeature,
{
    Arc::new(move |ctx| factory(ctx).map(|feature| FeatureInstance::Element(Arc::new(feature))))
}
