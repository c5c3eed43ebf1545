use reel_dom::{Document, ElementId, Selector};
use reel_engine::FeatureRuntime;
use reel_playback_speed::{ID, RATE_ATTRIBUTE};
use reel_store::{KeyValueStore, MemoryArea};
use serde_json::json;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(250);

struct Tab {
    document: Document,
    feed: ElementId,
    runtime: FeatureRuntime,
}

fn tab(area: &MemoryArea) -> Tab {
    let document = Document::new();
    let feed = document.append_element(document.body(), "div").unwrap();
    document.set_attribute(feed, "id", "feed").unwrap();
    let store = KeyValueStore::builder().area(area.clone()).connect().unwrap();
    let runtime = FeatureRuntime::builder().document(document.clone()).store(store).build().unwrap();
    reel_playback_speed::register(runtime.registry()).unwrap();
    Tab { document, feed, runtime }
}

impl Tab {
    fn add_video(&self) -> (ElementId, ElementId) {
        let item = self.document.append_element(self.feed, "div").unwrap();
        let video = self.document.append_element(item, "video").unwrap();
        (item, video)
    }

    fn buttons(&self) -> Vec<ElementId> {
        let selector = Selector::parse("[data-reel-feature=playback-speed]").unwrap();
        self.document.query_all(self.document.root(), &selector)
    }

    fn rate_of(&self, video: ElementId) -> Option<String> {
        self.document.attribute(video, RATE_ATTRIBUTE)
    }

    async fn settle(&self) {
        self.document.flush();
        tokio::time::sleep(SETTLE).await;
        self.document.flush();
    }
}

#[tokio::test(start_paused = true)]
async fn every_video_gets_one_button() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let (_, first) = tab.add_video();
    tab.runtime.initialize().await.unwrap();
    let (_, second) = tab.add_video();
    tab.settle().await;

    assert!(tab.runtime.is_feature_enabled(ID));
    assert_eq!(tab.buttons().len(), 2);
    assert_eq!(tab.rate_of(first).as_deref(), Some("1"));
    assert_eq!(tab.rate_of(second).as_deref(), Some("1"));
    assert_eq!(tab.document.text(tab.buttons()[0]).as_deref(), Some("1×"));
}

#[tokio::test(start_paused = true)]
async fn clicking_cycles_the_rate_of_every_video_and_persists_it() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let (_, first) = tab.add_video();
    let (_, second) = tab.add_video();
    tab.runtime.initialize().await.unwrap();
    tab.settle().await;

    let buttons = tab.buttons();
    tab.document.dispatch(buttons[0], "click").unwrap();

    assert_eq!(tab.rate_of(first).as_deref(), Some("1.25"));
    assert_eq!(tab.rate_of(second).as_deref(), Some("1.25"));
    for button in buttons {
        assert_eq!(tab.document.text(button).as_deref(), Some("1.25×"));
    }

    tab.settle().await;
    assert_eq!(area.snapshot().get("feature_pref:playback-speed:rate"), Some(&json!(1.25)));
}

#[tokio::test(start_paused = true)]
async fn the_stored_rate_is_applied_on_activation() {
    let area = MemoryArea::new();
    let seed = KeyValueStore::builder().area(area.clone()).connect().unwrap();
    seed.set("feature_pref:playback-speed:rate", &2.0).await.unwrap();

    let tab = tab(&area);
    let (_, video) = tab.add_video();
    tab.runtime.initialize().await.unwrap();
    tab.settle().await;

    assert_eq!(tab.rate_of(video).as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn a_rate_chosen_in_one_tab_reaches_the_others() {
    let area = MemoryArea::new();
    let left = tab(&area);
    let right = tab(&area);
    left.add_video();
    let (_, video) = right.add_video();
    left.runtime.initialize().await.unwrap();
    right.runtime.initialize().await.unwrap();
    left.settle().await;
    right.settle().await;

    left.document.dispatch(left.buttons()[0], "click").unwrap();
    left.settle().await;
    right.settle().await;

    assert_eq!(right.rate_of(video).as_deref(), Some("1.25"));
}

#[tokio::test(start_paused = true)]
async fn disabling_restores_the_page() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let (item, video) = tab.add_video();
    tab.runtime.initialize().await.unwrap();
    tab.settle().await;
    let button = tab.buttons()[0];

    tab.runtime.disable_feature(ID, true).await.unwrap();

    assert!(tab.buttons().is_empty());
    assert_eq!(tab.rate_of(video), None);
    assert_eq!(tab.document.listener_count(button), 0);
    assert_eq!(tab.document.children(item), vec![video]);
}

#[tokio::test(start_paused = true)]
async fn removed_videos_take_their_button_along() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let (item, _) = tab.add_video();
    let (_, kept) = tab.add_video();
    tab.runtime.initialize().await.unwrap();
    tab.settle().await;

    tab.document.remove(item).unwrap();
    tab.settle().await;

    assert_eq!(tab.buttons().len(), 1);
    assert!(tab.runtime.layout().container_for(kept).is_some());
    assert_eq!(tab.runtime.layout().len(), 1);
}
