use crate::error::EngineError;
use crate::feature::{
    ElementFeature, Feature, FeatureContext, FeatureFactory, FeatureOptions, erase_element, erase_page,
};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use reel_domain::features::FeatureId;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Immutable registration of one feature.
pub struct FeatureDescriptor {
    pub id: FeatureId,
    pub options: FeatureOptions,
    pub(crate) factory: FeatureFactory,
    /// Registration position; breaks priority ties.
    pub(crate) seq: usize,
}

impl fmt::Debug for FeatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureDescriptor")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    descriptors: Vec<Arc<FeatureDescriptor>>,
    index: FxHashMap<FeatureId, usize>,
}

/// Append-only table of feature descriptors.
#[derive(Clone, Default)]
pub struct FeatureRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRegistry").field("features", &self.inner.read().descriptors.len()).finish()
    }
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page-wide feature; chainable. One registry may back the runtimes of
    /// several tabs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Registration`] for malformed or duplicate ids and for
    /// options asking for element events.
    pub fn register<F, T>(&self, id: &str, factory: F, options: FeatureOptions) -> Result<&Self, EngineError>
    where
        F: Fn(FeatureContext) -> Result<T, EngineError> + Send + Sync + 'static,
        T: Feature,
    {
        self.insert(id, erase_page(factory), false, options)?;
        Ok(self)
    }

    /// Adds a feature that attaches to detected elements; chainable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Registration`] for malformed or duplicate ids and for
    /// options without [`FeatureTraits::ELEMENT_EVENTS`].
    ///
    /// [`FeatureTraits::ELEMENT_EVENTS`]: reel_domain::features::FeatureTraits::ELEMENT_EVENTS
    pub fn register_element<F, T>(&self, id: &str, factory: F, options: FeatureOptions) -> Result<&Self, EngineError>
    where
        F: Fn(FeatureContext) -> Result<T, EngineError> + Send + Sync + 'static,
        T: ElementFeature,
    {
        self.insert(id, erase_element(factory), true, options)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Registration`] for malformed or duplicate ids, or when
    /// `options` disagree with the hooks the factory provides.
    pub(crate) fn insert(
        &self,
        id: &str,
        factory: FeatureFactory,
        handles_elements: bool,
        options: FeatureOptions,
    ) -> Result<Arc<FeatureDescriptor>, EngineError> {
        let id = FeatureId::parse(id).ok_or_else(|| EngineError::Registration {
            message: id.to_owned().into(),
            context: Some("Feature ids are lowercase alphanumerics, '-' and '_'".into()),
        })?;
        if options.wants_element_events() != handles_elements {
            let context = if handles_elements {
                "Element features must be registered with ELEMENT_EVENTS"
            } else {
                "ELEMENT_EVENTS needs an ElementFeature registered through register_element"
            };
            return Err(EngineError::Registration { message: id.to_string().into(), context: Some(context.into()) });
        }

        let mut inner = self.inner.write();
        if inner.index.contains_key(&id) {
            return Err(EngineError::Registration {
                message: id.to_string().into(),
                context: Some("Duplicate feature id".into()),
            });
        }
        let seq = inner.descriptors.len();
        let descriptor = Arc::new(FeatureDescriptor { id: id.clone(), options, factory, seq });
        inner.descriptors.push(Arc::clone(&descriptor));
        inner.index.insert(id, seq);
        debug!(feature = %descriptor.id, priority = options.priority, "Feature registered");
        Ok(descriptor)
    }

    pub fn get(&self, id: &str) -> Option<Arc<FeatureDescriptor>> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&i| Arc::clone(&inner.descriptors[i]))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<FeatureId> {
        self.inner.read().descriptors.iter().map(|d| d.id.clone()).collect()
    }

    /// Descriptors by priority, highest first; ties keep registration order.
    pub fn by_priority(&self) -> Vec<Arc<FeatureDescriptor>> {
        let mut descriptors = self.inner.read().descriptors.clone();
        descriptors.sort_by(|a, b| b.options.priority.cmp(&a.options.priority).then(a.seq.cmp(&b.seq)));
        descriptors
    }
}
