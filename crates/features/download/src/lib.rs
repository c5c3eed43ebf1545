//! Download button placed in the [`Slot::Download`] position of every video.
//!
//! The button resolves the video source at click time, so sources attached after
//! detection still work. Requested sources are kept in a short most-recent-first
//! history under `feature_pref:download:history`.

use reel_domain::constants::FEATURE_ATTRIBUTE;
use reel_domain::features::FeatureTraits;
use reel_domain::slots::Slot;
use reel_dom::{Document, ElementId, ListenerId, Selector};
use reel_engine::{
    ControlsLayout, ElementFeature, ElementLifecycle, EngineError, EngineErrorExt, Feature,
    FeatureContext, FeatureOptions, FeatureRegistry,
};
use reel_store::{KeyValueStore, NamespacedStore};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

pub const ID: &str = "download";

/// Entries kept in the download history.
pub const HISTORY_LIMIT: usize = 20;

/// Full store key of the download history.
pub const HISTORY_KEY: &str = "feature_pref:download:history";

const HISTORY: &str = "history";
const DISABLED_ATTRIBUTE: &str = "aria-disabled";

pub fn options() -> FeatureOptions {
    FeatureOptions::builder().priority(10).traits(FeatureTraits::ELEMENT_EVENTS).build()
}

/// Registers the feature under [`ID`].
///
/// # Errors
///
/// Returns [`EngineError::Registration`] when the id is already taken.
pub fn register(registry: &FeatureRegistry) -> Result<(), EngineError> {
    registry.register_element(ID, Download::new, options())?;
    Ok(())
}

/// Source URL of `video`: its own `src`, else the first `<source>` child carrying one.
pub fn video_source(document: &Document, video: ElementId) -> Option<String> {
    if let Some(src) = document.attribute(video, "src").filter(|s| !s.is_empty()) {
        return Some(src);
    }
    let sources = Selector::parse("source").ok()?;
    document
        .query_all(video, &sources)
        .into_iter()
        .find_map(|source| document.attribute(source, "src").filter(|s| !s.is_empty()))
}

/// Download history, most recent first.
///
/// # Errors
///
/// Returns [`EngineError::Persistence`] when the store cannot be read.
pub async fn history(store: &KeyValueStore) -> Result<Vec<String>, EngineError> {
    store.get(HISTORY_KEY, Vec::<String>::new()).await.context("Download history")
}

/// Moves `src` to the front of `history` and caps its length.
fn remember(mut history: Vec<String>, src: String) -> Vec<String> {
    history.retain(|entry| *entry != src);
    history.insert(0, src);
    history.truncate(HISTORY_LIMIT);
    history
}

struct Control {
    button: ElementId,
    listener: ListenerId,
}

struct Shared {
    ctx: FeatureContext,
    prefs: NamespacedStore,
    lifecycle: ElementLifecycle<Control>,
    handle: Handle,
    // Serializes read-modify-write cycles of the history.
    writes: Arc<AsyncMutex<()>>,
}

impl Shared {
    fn request(&self, document: &Document, button: ElementId, video: ElementId) {
        let Some(src) = video_source(document, video) else {
            debug!(element = %video, "Download requested for a video without source");
            let _ = document.set_attribute(button, DISABLED_ATTRIBUTE, "true");
            return;
        };
        let _ = document.remove_attribute(button, DISABLED_ATTRIBUTE);
        info!(src = %src, "Download requested");

        let prefs = self.prefs.clone();
        let writes = Arc::clone(&self.writes);
        self.handle.spawn(async move {
            let _guard = writes.lock().await;
            let result = async {
                let current = prefs.get(HISTORY, Vec::<String>::new()).await?;
                prefs.set(HISTORY, &remember(current, src)).await
            }
            .await;
            if let Err(e) = result {
                warn!(error = %e, "Could not update the download history");
            }
        });
    }

    fn attach(self: &Arc<Self>, document: &Document, video: ElementId) -> Result<Control, EngineError> {
        let button = document.create_element("button");
        document.set_attribute(button, FEATURE_ATTRIBUTE, ID).context("Download button")?;
        document.set_text(button, "Download").context("Download button")?;
        if video_source(document, video).is_none() {
            document.set_attribute(button, DISABLED_ATTRIBUTE, "true").context("Download button")?;
        }

        let weak = Arc::downgrade(self);
        let listener = document
            .add_listener(
                button,
                "click",
                Arc::new(move |document: &Document, button: ElementId| {
                    if let Some(shared) = weak.upgrade() {
                        shared.request(document, button, video);
                    }
                }),
            )
            .context("Download button listener")?;

        self.ctx.layout.register_element(video, Slot::Download, button)?;
        Ok(Control { button, listener })
    }
}

fn teardown(layout: ControlsLayout) -> impl Fn(&Document, ElementId, Control) + Send + Sync {
    move |document: &Document, video: ElementId, control: Control| {
        document.remove_listener(control.button, control.listener);
        if layout.control(video, Slot::Download) == Some(control.button) {
            layout.unregister_element(video, Slot::Download);
        } else {
            let _ = document.remove(control.button);
        }
    }
}

pub struct Download {
    shared: Arc<Shared>,
}

impl Download {
    /// # Errors
    ///
    /// Fails outside a Tokio runtime or when the content root is gone.
    pub fn new(ctx: FeatureContext) -> Result<Self, EngineError> {
        let handle = Handle::try_current().map_err(|e| EngineError::Internal {
            message: e.to_string().into(),
            context: Some("Download needs a Tokio runtime".into()),
        })?;
        let prefs = ctx.preferences().context("Download preferences")?;
        let lifecycle = ElementLifecycle::new(
            ctx.id.clone(),
            ctx.document.clone(),
            ctx.content_root,
            teardown(ctx.layout.clone()),
        )?;
        let writes = Arc::new(AsyncMutex::new(()));
        Ok(Self { shared: Arc::new(Shared { ctx, prefs, lifecycle, handle, writes }) })
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("tracked", &self.shared.lifecycle.tracked_count())
            .finish_non_exhaustive()
    }
}

impl ElementFeature for Download {
    fn process_element(&self, element: ElementId) -> Result<(), EngineError> {
        let shared = &self.shared;
        shared.lifecycle.process_once(element, |document, video| shared.attach(document, video))?;
        Ok(())
    }
}

impl Feature for Download {
    fn cleanup(&self) {
        let removed = self.shared.lifecycle.cleanup(|| {});
        debug!(removed, "Download cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_most_recent_first_without_duplicates() {
        let history = remember(vec!["a".into(), "b".into()], "b".into());
        assert_eq!(history, vec!["b", "a"]);
    }

    #[test]
    fn history_is_capped() {
        let full: Vec<String> = (0..HISTORY_LIMIT).map(|n| n.to_string()).collect();
        let history = remember(full, "new".into());
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0], "new");
        assert_eq!(history.last().map(String::as_str), Some("18"));
    }
}
