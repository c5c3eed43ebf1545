//! `reelsim`: several simulated tabs of one origin scroll an infinite video feed
//! while a settings surface toggles features through the shared store and the tab
//! bus. Every tab runs the built-in features on its own document.

use anyhow::Context;
use clap::Parser;
use reel::dom::{Document, ElementId, Selector};
use reel::domain::slots::Slot;
use reel::engine::{ControlChannel, SettingsClient};
use reel::events::{Origin, OriginPattern, TabBus};
use reel::kernel::config::load_reel_config;
use reel::store::{KeyValueStore, MemoryArea};
use reel::{FeatureRuntime, install_builtin};
use reel_logger::Logger;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "reelsim", version, about)]
struct Cli {
    /// Configuration file; defaults to `reel.*` in the working directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated tabs.
    #[arg(short, long, default_value_t = 3)]
    tabs: usize,

    /// Scroll steps per tab.
    #[arg(short, long, default_value_t = 6)]
    scrolls: usize,

    /// Videos loaded by each scroll step.
    #[arg(long, default_value_t = 4)]
    batch: usize,

    /// Videos kept in the DOM; older items are virtualized away.
    #[arg(long, default_value_t = 12)]
    window: usize,

    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Features the settings surface toggles halfway through.
    #[arg(long = "toggle", value_name = "FEATURE")]
    toggles: Vec<String>,

    /// Suspend every tab for one scroll step.
    #[arg(long)]
    suspend: bool,

    #[arg(long, default_value = "https://www.example.com/feed")]
    origin: String,
}

struct Tab {
    index: usize,
    document: Document,
    feed: ElementId,
    runtime: FeatureRuntime,
    items: Vec<ElementId>,
    loaded: usize,
    _control: ControlChannel,
}

impl Tab {
    /// Appends `batch` feed items and drops the ones scrolled past `window`.
    fn scroll(&mut self, batch: usize, window: usize) -> anyhow::Result<()> {
        for _ in 0..batch {
            let item = self.document.append_element(self.feed, "article")?;
            let video = self.document.append_element(item, "video")?;
            let src = format!("https://cdn.example.com/{}/{}.mp4", self.index, self.loaded);
            self.document.set_attribute(video, "src", &src)?;
            self.items.push(item);
            self.loaded += 1;
        }
        while self.items.len() > window {
            let item = self.items.remove(0);
            self.document.remove(item)?;
        }
        self.document.flush();
        Ok(())
    }

    fn report(&self) {
        let stats = self.runtime.stats();
        let active: Vec<String> = self.runtime.active_features().iter().map(ToString::to_string).collect();
        let videos = Selector::parse("video")
            .map(|s| self.document.query_all(self.feed, &s).len())
            .unwrap_or_default();
        info!(
            tab = self.index,
            active = ?active,
            suspended = stats.suspended,
            videos,
            containers = self.runtime.layout().len(),
            loaded = self.loaded,
            "Tab state"
        );
    }
}

#[reel_executor::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_reel_config(cli.config.as_ref()).context("Loading configuration")?;
    let _logger = Logger::from_settings(env!("CARGO_PKG_NAME"), &config.log)?;
    info!(tabs = cli.tabs, scrolls = cli.scrolls, origin = %cli.origin, "Starting simulation");

    let area = MemoryArea::new();
    let bus = TabBus::new();
    let origin = Origin::parse(&cli.origin)?;

    let mut tabs = Vec::with_capacity(cli.tabs);
    for index in 0..cli.tabs {
        let document = Document::new();
        let feed = document.append_element(document.body(), "div")?;
        document.set_attribute(feed, "id", "feed")?;

        let store = KeyValueStore::builder()
            .cache_ttl(config.store.cache_ttl())
            .cache_capacity(config.store.cache_capacity)
            .area(area.clone())
            .connect()?;
        let runtime = FeatureRuntime::builder()
            .document(document.clone())
            .store(store)
            .settings(config.runtime.clone())
            .build()?;
        install_builtin(runtime.registry())?;
        runtime.initialize().await?;

        let control = ControlChannel::spawn(runtime.clone(), bus.connect(origin.clone())?);
        tabs.push(Tab { index, document, feed, runtime, items: Vec::new(), loaded: 0, _control: control });
    }

    let settings_store = KeyValueStore::builder().area(area.clone()).connect()?;
    let settings = SettingsClient::new(
        settings_store,
        bus.connect(Origin::parse("https://settings.reel.local")?)?,
        OriginPattern::parse(&cli.origin)?,
    );
    info!(reached = settings.ping(), "Settings surface connected");

    let interval = Duration::from_millis(cli.interval_ms);
    for step in 0..cli.scrolls {
        for tab in &mut tabs {
            tab.scroll(cli.batch, cli.window)?;
        }
        tokio::time::sleep(interval).await;

        if step == 0 {
            click_speed_button(&tabs);
        }
        if step == cli.scrolls / 2 {
            toggle(&settings, &tabs, &cli.toggles).await;
            if cli.suspend {
                settings.set_suspended(true).await?;
            }
        } else if cli.suspend && step == cli.scrolls / 2 + 1 {
            settings.set_suspended(false).await?;
        }
    }
    tokio::time::sleep(interval).await;

    for tab in &tabs {
        tab.report();
    }
    for tab in &tabs {
        tab.runtime.shutdown().await;
    }
    info!("Simulation finished");
    Ok(())
}

/// Cycles the playback rate in the first tab; the others follow through the store.
fn click_speed_button(tabs: &[Tab]) {
    let Some(tab) = tabs.first() else {
        return;
    };
    let button = tab.items.iter().find_map(|item| {
        let video = tab.document.children(*item).into_iter().next()?;
        tab.runtime.layout().control(video, Slot::PlaybackSpeed)
    });
    match button {
        Some(button) => {
            if let Err(e) = tab.document.dispatch(button, "click") {
                warn!(error = %e, "Speed button click failed");
            }
        },
        None => info!("No playback speed control to click"),
    }
}

async fn toggle(settings: &SettingsClient, tabs: &[Tab], ids: &[String]) {
    let Some(registry) = tabs.first().map(|tab| tab.runtime.registry()) else {
        return;
    };
    for id in ids {
        let Some(descriptor) = registry.get(id) else {
            warn!(feature = %id, "Unknown feature, not toggled");
            continue;
        };
        match settings.toggle_feature(id, descriptor.options.default_enabled).await {
            Ok(enabled) => info!(feature = %id, enabled, "Feature toggled from settings"),
            Err(e) => warn!(error = %e, feature = %id, "Toggle failed"),
        }
    }
}
