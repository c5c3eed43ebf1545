use reel_dom::{Document, Selector};
use reel_engine::FeatureRuntime;
use reel_focus_mode::{BODY_CLASS, ID, STYLE_ID};
use reel_store::{KeyValueStore, MemoryArea};
use std::time::Duration;

fn runtime(area: &MemoryArea) -> FeatureRuntime {
    let document = Document::new();
    let store = KeyValueStore::builder().area(area.clone()).connect().unwrap();
    let runtime = FeatureRuntime::builder().document(document).store(store).build().unwrap();
    reel_focus_mode::register(runtime.registry()).unwrap();
    runtime
}

fn styles(document: &Document) -> usize {
    let selector = Selector::parse(&format!("#{STYLE_ID}")).unwrap();
    document.query_all(document.head(), &selector).len()
}

fn focused(document: &Document) -> bool {
    document.has_class(document.body(), BODY_CLASS)
}

#[tokio::test(start_paused = true)]
async fn off_until_enabled() {
    let runtime = runtime(&MemoryArea::new());
    runtime.initialize().await.unwrap();

    assert!(!runtime.is_feature_enabled(ID));
    assert!(!focused(runtime.document()));
    assert_eq!(styles(runtime.document()), 0);
}

#[tokio::test(start_paused = true)]
async fn enabling_injects_once_and_disabling_reverts() {
    let runtime = runtime(&MemoryArea::new());
    runtime.initialize().await.unwrap();

    runtime.enable_feature(ID, true).await.unwrap();
    runtime.enable_feature(ID, true).await.unwrap();
    assert!(focused(runtime.document()));
    assert_eq!(styles(runtime.document()), 1);

    runtime.disable_feature(ID, true).await.unwrap();
    assert!(!focused(runtime.document()));
    assert_eq!(styles(runtime.document()), 0);
}

#[tokio::test(start_paused = true)]
async fn a_foreign_stylesheet_with_the_same_id_is_left_alone() {
    let runtime = runtime(&MemoryArea::new());
    let document = runtime.document().clone();
    let foreign = document.append_element(document.head(), "style").unwrap();
    document.set_attribute(foreign, "id", STYLE_ID).unwrap();
    runtime.initialize().await.unwrap();

    runtime.enable_feature(ID, false).await.unwrap();
    assert_eq!(styles(&document), 1);
    runtime.disable_feature(ID, false).await.unwrap();
    assert!(document.is_connected(foreign));
}

#[tokio::test(start_paused = true)]
async fn remote_toggles_reload_other_tabs() {
    let area = MemoryArea::new();
    let left = runtime(&area);
    let right = runtime(&area);
    left.initialize().await.unwrap();
    right.initialize().await.unwrap();

    left.enable_feature(ID, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(right.is_feature_enabled(ID));
    assert!(focused(right.document()));
    assert_eq!(styles(right.document()), 1);
}
