//! Playback speed control: one button per video that cycles through [`RATES`].
//!
//! The selected rate is a preference shared by every tab, stored under
//! `feature_pref:playback-speed:rate`. Changing it in one tab re-applies it to the
//! videos of all the others through the store change stream.

use parking_lot::Mutex;
use reel_domain::constants::FEATURE_ATTRIBUTE;
use reel_domain::features::FeatureTraits;
use reel_domain::slots::Slot;
use reel_dom::{Document, ElementId, ListenerId};
use reel_engine::{
    ControlsLayout, ElementFeature, ElementLifecycle, EngineError, EngineErrorExt, Feature,
    FeatureContext, FeatureOptions, FeatureRegistry,
};
use reel_store::{ChangeListener, NamespacedStore, StoreEvent};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

pub const ID: &str = "playback-speed";

/// Rates in cycling order.
pub const RATES: [f64; 5] = [1.0, 1.25, 1.5, 2.0, 0.5];
pub const DEFAULT_RATE: f64 = 1.0;

/// Mirrors the rate applied to a video element.
pub const RATE_ATTRIBUTE: &str = "data-playback-rate";

const RATE_KEY: &str = "rate";

pub fn options() -> FeatureOptions {
    FeatureOptions::builder().priority(20).traits(FeatureTraits::ELEMENT_EVENTS).build()
}

/// Registers the feature under [`ID`].
///
/// # Errors
///
/// Returns [`EngineError::Registration`] when the id is already taken.
pub fn register(registry: &FeatureRegistry) -> Result<(), EngineError> {
    registry.register_element(ID, PlaybackSpeed::new, options())?;
    Ok(())
}

/// Rate following `current`; rates outside [`RATES`] restart the cycle.
pub fn next_rate(current: f64) -> f64 {
    RATES
        .iter()
        .position(|rate| same_rate(*rate, current))
        .map_or(RATES[0], |i| RATES[(i + 1) % RATES.len()])
}

/// Button caption, e.g. `1.25×`.
pub fn label(rate: f64) -> String {
    format!("{rate}×")
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() < f64::EPSILON
}

struct Control {
    button: ElementId,
    listener: ListenerId,
}

struct Shared {
    ctx: FeatureContext,
    prefs: NamespacedStore,
    rate: Mutex<f64>,
    lifecycle: ElementLifecycle<Control>,
    handle: Handle,
}

impl Shared {
    fn rate(&self) -> f64 {
        *self.rate.lock()
    }

    /// Applies `rate` to every tracked video; `false` when it was already current.
    fn apply(&self, rate: f64) -> bool {
        {
            let mut current = self.rate.lock();
            if same_rate(*current, rate) {
                return false;
            }
            *current = rate;
        }

        let document = &self.ctx.document;
        let caption = label(rate);
        for video in self.lifecycle.tracked_elements() {
            if let Err(e) = document.set_attribute(video, RATE_ATTRIBUTE, &rate.to_string()) {
                debug!(error = %e, element = %video, "Video vanished before the rate applied");
            }
            if let Some(button) = self.lifecycle.with_tracked(video, |control| control.button) {
                let _ = document.set_text(button, &caption);
            }
        }
        debug!(rate, videos = self.lifecycle.tracked_count(), "Playback rate applied");
        true
    }

    fn cycle(&self) {
        let rate = next_rate(self.rate());
        self.apply(rate);

        let prefs = self.prefs.clone();
        self.handle.spawn(async move {
            if let Err(e) = prefs.set(RATE_KEY, &rate).await {
                warn!(error = %e, rate, "Could not persist the playback rate");
            }
        });
    }

    fn attach(self: &Arc<Self>, document: &Document, video: ElementId) -> Result<Control, EngineError> {
        let rate = self.rate();
        let button = document.create_element("button");
        document.set_attribute(button, FEATURE_ATTRIBUTE, ID).context("Speed button")?;
        document.set_text(button, &label(rate)).context("Speed button")?;

        let weak = Arc::downgrade(self);
        let listener = document
            .add_listener(
                button,
                "click",
                Arc::new(move |_: &Document, _: ElementId| {
                    if let Some(shared) = weak.upgrade() {
                        shared.cycle();
                    }
                }),
            )
            .context("Speed button listener")?;

        self.ctx.layout.register_element(video, Slot::PlaybackSpeed, button)?;
        document.set_attribute(video, RATE_ATTRIBUTE, &rate.to_string()).context("Applying rate")?;
        Ok(Control { button, listener })
    }
}

fn teardown(layout: ControlsLayout) -> impl Fn(&Document, ElementId, Control) + Send + Sync {
    move |document: &Document, video: ElementId, control: Control| {
        document.remove_listener(control.button, control.listener);
        // The slot may have been claimed by someone else since.
        if layout.control(video, Slot::PlaybackSpeed) == Some(control.button) {
            layout.unregister_element(video, Slot::PlaybackSpeed);
        } else {
            let _ = document.remove(control.button);
        }
        let _ = document.remove_attribute(video, RATE_ATTRIBUTE);
    }
}

/// Per-video speed button.
pub struct PlaybackSpeed {
    shared: Arc<Shared>,
    sync: Mutex<Option<ChangeListener>>,
}

impl PlaybackSpeed {
    /// Builds an instance and starts loading the stored rate in the background.
    ///
    /// # Errors
    ///
    /// Fails outside a Tokio runtime or when the content root is gone.
    pub fn new(ctx: FeatureContext) -> Result<Self, EngineError> {
        let handle = Handle::try_current().map_err(|e| EngineError::Internal {
            message: e.to_string().into(),
            context: Some("Playback speed needs a Tokio runtime".into()),
        })?;
        let prefs = ctx.preferences().context("Playback speed preferences")?;
        let lifecycle = ElementLifecycle::new(
            ctx.id.clone(),
            ctx.document.clone(),
            ctx.content_root,
            teardown(ctx.layout.clone()),
        )?;

        let shared =
            Arc::new(Shared { ctx, prefs, rate: Mutex::new(DEFAULT_RATE), lifecycle, handle });

        let weak = Arc::downgrade(&shared);
        let prefs = shared.prefs.clone();
        shared.handle.spawn(async move {
            match prefs.get(RATE_KEY, DEFAULT_RATE).await {
                Ok(rate) => {
                    if let Some(shared) = weak.upgrade() {
                        shared.apply(rate);
                    }
                },
                Err(e) => warn!(error = %e, "Stored playback rate unavailable, using default"),
            }
        });

        let weak = Arc::downgrade(&shared);
        let key = shared.prefs.key(RATE_KEY);
        let sync = shared.ctx.store.add_change_listener(move |event| {
            let StoreEvent::Changed(change) = event else {
                return;
            };
            if change.key != key {
                return;
            }
            let Some(rate) = change.new_value.as_ref().and_then(Value::as_f64) else {
                return;
            };
            if let Some(shared) = weak.upgrade() {
                shared.apply(rate);
            }
        });

        Ok(Self { shared, sync: Mutex::new(Some(sync)) })
    }

    /// Rate currently applied to the videos of this tab.
    pub fn rate(&self) -> f64 {
        self.shared.rate()
    }
}

impl fmt::Debug for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSpeed")
            .field("rate", &self.rate())
            .field("tracked", &self.shared.lifecycle.tracked_count())
            .finish_non_exhaustive()
    }
}

impl ElementFeature for PlaybackSpeed {
    fn process_element(&self, element: ElementId) -> Result<(), EngineError> {
        let shared = &self.shared;
        shared.lifecycle.process_once(element, |document, video| shared.attach(document, video))?;
        Ok(())
    }
}

impl Feature for PlaybackSpeed {
    fn cleanup(&self) {
        if let Some(sync) = self.sync.lock().take() {
            sync.remove();
        }
        let removed = self.shared.lifecycle.cleanup(|| {});
        debug!(removed, "Playback speed cleaned up");
    }
}
