//! Focus mode: a page-wide stylesheet that hides everything around the feed.
//!
//! The feature has no per-element work. Its one-shot scan injects
//! `<style id="reel-focus-mode">` into the head and marks the body with
//! [`BODY_CLASS`]; cleanup reverts both. The styling cannot be toggled
//! incrementally on other tabs, so remote changes reload the runtime.

use parking_lot::Mutex;
use reel_domain::constants::FEATURE_ATTRIBUTE;
use reel_domain::features::FeatureTraits;
use reel_dom::{Document, ElementId, Selector};
use reel_engine::{EngineError, EngineErrorExt, Feature, FeatureContext, FeatureOptions, FeatureRegistry};
use tracing::debug;

pub const ID: &str = "focus-mode";
pub const STYLE_ID: &str = "reel-focus-mode";
pub const BODY_CLASS: &str = "reel-focus";

const STYLESHEET: &str = "\
body.reel-focus header, body.reel-focus aside, body.reel-focus .comments { display: none !important; }
body.reel-focus video { max-height: 100vh; }
";

/// Evaluated before the element features, off until the user opts in.
pub fn options() -> FeatureOptions {
    FeatureOptions::builder()
        .priority(100)
        .default_enabled(false)
        .traits(FeatureTraits::RELOAD_ON_TOGGLE)
        .build()
}

/// Registers the feature under [`ID`].
///
/// # Errors
///
/// Returns [`EngineError::Registration`] when the id is already taken.
pub fn register(registry: &FeatureRegistry) -> Result<(), EngineError> {
    registry.register(ID, FocusMode::new, options())?;
    Ok(())
}

#[derive(Debug)]
pub struct FocusMode {
    document: Document,
    // Only a stylesheet this instance created is removed again.
    style: Mutex<Option<ElementId>>,
}

impl FocusMode {
    /// # Errors
    ///
    /// Never fails; the signature matches the factory contract.
    #[allow(clippy::unnecessary_wraps)]
    pub fn new(ctx: FeatureContext) -> Result<Self, EngineError> {
        Ok(Self { document: ctx.document, style: Mutex::new(None) })
    }

    fn existing_style(&self) -> Option<ElementId> {
        let selector = Selector::parse(&format!("#{STYLE_ID}")).ok()?;
        self.document.query(self.document.head(), &selector)
    }
}

impl Feature for FocusMode {
    fn scan(&self) -> Result<(), EngineError> {
        let document = &self.document;
        if self.existing_style().is_none() {
            let style = document.create_element("style");
            document.set_attribute(style, "id", STYLE_ID).context("Focus stylesheet")?;
            document.set_attribute(style, FEATURE_ATTRIBUTE, ID).context("Focus stylesheet")?;
            document.set_text(style, STYLESHEET).context("Focus stylesheet")?;
            document.append_child(document.head(), style).context("Focus stylesheet")?;
            *self.style.lock() = Some(style);
        }
        document.add_class(document.body(), BODY_CLASS).context("Focus body class")?;
        debug!("Focus mode applied");
        Ok(())
    }

    fn cleanup(&self) {
        if let Some(style) = self.style.lock().take() {
            let _ = self.document.remove(style);
        }
        let _ = self.document.remove_class(self.document.body(), BODY_CLASS);
        debug!("Focus mode removed");
    }
}
