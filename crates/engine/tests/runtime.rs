mod common;

use common::{
    BodyClass, Counters, FailingScan, SlotButton, add_video, count, has_body_class, settle, store_over, tab,
};
use parking_lot::Mutex;
use reel_domain::constants::{SUSPEND_KEY, flag_key};
use reel_domain::features::{FeatureId, FeatureTraits};
use reel_domain::slots::Slot;
use reel_domain::stats::FeatureStateChanged;
use reel_engine::{
    ControlChannel, ElementFeature, EngineError, Feature, FeatureContext, FeatureOptions, SettingsClient,
};
use reel_events::{Origin, OriginPattern, TabBus};
use reel_store::{MemoryArea, StorageArea};
use serde_json::json;
use std::sync::Arc;

fn element_options(priority: i32) -> FeatureOptions {
    FeatureOptions::builder().priority(priority).traits(FeatureTraits::ELEMENT_EVENTS).build()
}

fn flag(id: &str) -> String {
    flag_key(&FeatureId::parse(id).unwrap())
}

#[tokio::test(start_paused = true)]
async fn initialization_follows_priority_and_default_flags() {
    let area = MemoryArea::new();
    area.set_many(vec![(flag("stored-on"), json!(true)), (flag("stored-off"), json!(false))]).await.unwrap();
    let tab = tab(&area);
    let order = Arc::new(Mutex::new(Vec::new()));
    let off_by_default = FeatureOptions::builder().default_enabled(false);

    tab.runtime
        .register("low", BodyClass::factory(&order), FeatureOptions::builder().priority(1).build())
        .unwrap()
        .register("high", BodyClass::factory(&order), FeatureOptions::builder().priority(10).build())
        .unwrap()
        .register("default-off", BodyClass::factory(&order), off_by_default.build())
        .unwrap()
        .register("stored-on", BodyClass::factory(&order), FeatureOptions::builder().default_enabled(false).build())
        .unwrap()
        .register("stored-off", BodyClass::factory(&order), FeatureOptions::default())
        .unwrap();

    let before = area.round_trips();
    tab.runtime.initialize().await.unwrap();

    assert_eq!(area.round_trips() - before, 1, "one bulk read");
    assert_eq!(*order.lock(), ["high", "low", "stored-on"]);
    assert!(has_body_class(&tab.document, "stored-on"));
    assert!(!tab.runtime.is_feature_enabled("default-off"));
    assert!(!tab.runtime.is_feature_enabled("stored-off"));
    // Initialization never writes back what it read.
    assert_eq!(area.snapshot().len(), 2);

    let stats = tab.runtime.stats();
    assert_eq!((stats.registered, stats.active, stats.suspended), (5, 3, false));
}

#[tokio::test(start_paused = true)]
async fn registration_rejects_duplicates() {
    let tab = tab(&MemoryArea::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime.register("focus", BodyClass::factory(&order), FeatureOptions::default()).unwrap();

    let err = tab.runtime.register("focus", BodyClass::factory(&order), FeatureOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::Registration { .. }));
    let err = tab.runtime.enable_feature("missing", true).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownFeature { .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_bulk_read_leaves_everything_off() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let counters = Counters::new();
    tab.runtime.register_element("buttons", SlotButton::factory(Slot::Download, &counters), element_options(0)).unwrap();
    area.set_unreachable(true);

    let err = tab.runtime.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { .. }));
    assert_eq!(tab.runtime.stats().active, 0);
    assert!(!tab.runtime.is_initialized());
    assert_eq!(counters.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn element_features_process_each_video_once() {
    let tab = tab(&MemoryArea::new());
    add_video(&tab.document, tab.feed);
    let counters = Counters::new();
    tab.runtime.register_element("buttons", SlotButton::factory(Slot::Download, &counters), element_options(0)).unwrap();
    tab.runtime.initialize().await.unwrap();
    assert_eq!(counters.processed(), 1);
    assert!(tab.runtime.stats().observer_active);

    for _ in 0..3 {
        add_video(&tab.document, tab.feed);
    }
    settle(&tab.document).await;
    assert_eq!(counters.processed(), 4);

    // Enabling an active feature is a no-op.
    tab.runtime.enable_feature("buttons", false).await.unwrap();
    settle(&tab.document).await;
    assert_eq!(counters.created(), 1);
    assert_eq!(counters.processed(), 4);
    assert_eq!(count(&tab.document, "[data-reel-feature=buttons]"), 4);
}

#[tokio::test(start_paused = true)]
async fn disable_removes_every_trace() {
    let tab = tab(&MemoryArea::new());
    for _ in 0..3 {
        add_video(&tab.document, tab.feed);
    }
    let counters = Counters::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime
        .register_element("buttons", SlotButton::factory(Slot::Download, &counters), element_options(0))
        .unwrap()
        .register("focus", BodyClass::factory(&order), FeatureOptions::default())
        .unwrap();
    tab.runtime.initialize().await.unwrap();
    let nodes_before = count(&tab.document, "*");

    tab.runtime.disable_feature("buttons", true).await.unwrap();
    tab.runtime.disable_feature("focus", true).await.unwrap();
    tab.runtime.disable_feature("focus", true).await.unwrap();

    assert_eq!(count(&tab.document, "[data-reel-feature]"), 0);
    assert_eq!(count(&tab.document, ".reel-controls"), 0);
    assert_eq!(count(&tab.document, "*"), nodes_before - 6);
    assert!(!has_body_class(&tab.document, "focus"));
    assert_eq!((counters.torn_down(), counters.cleanups()), (3, 1));
    assert!(!tab.runtime.stats().observer_active);
    assert_eq!(tab.document.observer_count(), 0);
    assert!(!tab.runtime.store().get(&flag("buttons"), true).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn two_features_share_one_container_in_slot_order() {
    let tab = tab(&MemoryArea::new());
    let (_, video) = add_video(&tab.document, tab.feed);
    let download = Counters::new();
    let speed = Counters::new();
    tab.runtime
        .register_element("download", SlotButton::factory(Slot::Download, &download), element_options(5))
        .unwrap()
        .register_element("speed", SlotButton::factory(Slot::PlaybackSpeed, &speed), element_options(1))
        .unwrap();
    tab.runtime.initialize().await.unwrap();

    let layout = tab.runtime.layout();
    let container = layout.container_for(video).unwrap();
    let rendered = tab.document.rendered_order(container);
    assert_eq!(rendered, vec![
        layout.control(video, Slot::PlaybackSpeed).unwrap(),
        layout.control(video, Slot::Download).unwrap(),
    ]);

    tab.runtime.disable_feature("speed", false).await.unwrap();
    assert_eq!(tab.document.children(container).len(), 1);
    tab.runtime.disable_feature("download", false).await.unwrap();
    assert!(!tab.document.is_connected(container));
}

#[tokio::test(start_paused = true)]
async fn moved_videos_leave_no_container_behind() {
    let tab = tab(&MemoryArea::new());
    let (_, video) = add_video(&tab.document, tab.feed);
    let download = Counters::new();
    let speed = Counters::new();
    let off = FeatureOptions::builder().traits(FeatureTraits::ELEMENT_EVENTS).default_enabled(false).build();
    tab.runtime
        .register_element("download", SlotButton::factory(Slot::Download, &download), element_options(5))
        .unwrap()
        .register_element("speed", SlotButton::factory(Slot::PlaybackSpeed, &speed), off)
        .unwrap();
    tab.runtime.initialize().await.unwrap();

    let wrapper = tab.document.append_element(tab.feed, "div").unwrap();
    tab.document.append_child(wrapper, video).unwrap();
    settle(&tab.document).await;
    tab.runtime.enable_feature("speed", false).await.unwrap();
    assert_eq!(count(&tab.document, ".reel-controls"), 1);

    tab.runtime.disable_feature("download", false).await.unwrap();
    tab.runtime.disable_feature("speed", false).await.unwrap();
    assert_eq!(count(&tab.document, ".reel-controls"), 0);
    assert_eq!(count(&tab.document, "button"), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_videos_are_torn_down_while_active() {
    let tab = tab(&MemoryArea::new());
    let items: Vec<_> = (0..5).map(|_| add_video(&tab.document, tab.feed).0).collect();
    let counters = Counters::new();
    tab.runtime.register_element("buttons", SlotButton::factory(Slot::Share, &counters), element_options(0)).unwrap();
    tab.runtime.initialize().await.unwrap();

    for item in items {
        tab.document.remove(item).unwrap();
    }
    settle(&tab.document).await;
    assert_eq!(counters.torn_down(), 5);

    tab.runtime.disable_feature("buttons", false).await.unwrap();
    assert_eq!(counters.torn_down(), 5, "nothing is torn down twice");
}

#[tokio::test(start_paused = true)]
async fn disabling_tears_down_five_tracked_videos_exactly_once() {
    let tab = tab(&MemoryArea::new());
    for _ in 0..5 {
        add_video(&tab.document, tab.feed);
    }
    let counters = Counters::new();
    tab.runtime.register_element("buttons", SlotButton::factory(Slot::Download, &counters), element_options(0)).unwrap();
    tab.runtime.initialize().await.unwrap();
    assert_eq!(counters.processed(), 5);

    tab.runtime.disable_feature("buttons", false).await.unwrap();
    assert_eq!((counters.torn_down(), counters.cleanups()), (5, 1));
    assert_eq!(count(&tab.document, "button"), 0);

    tab.runtime.disable_feature("buttons", false).await.unwrap();
    settle(&tab.document).await;
    assert_eq!((counters.torn_down(), counters.cleanups()), (5, 1));
}

#[tokio::test(start_paused = true)]
async fn a_second_cleanup_fires_nothing() {
    let tab = tab(&MemoryArea::new());
    let videos: Vec<_> = (0..5).map(|_| add_video(&tab.document, tab.feed).1).collect();
    let counters = Counters::new();
    let ctx = FeatureContext {
        id: FeatureId::parse("buttons").unwrap(),
        document: tab.document.clone(),
        layout: tab.runtime.layout().clone(),
        store: tab.runtime.store().clone(),
        content_root: tab.feed,
    };
    let feature = SlotButton::factory(Slot::Download, &counters)(ctx).unwrap();
    for video in &videos {
        feature.process_element(*video).unwrap();
    }

    feature.cleanup();
    assert_eq!((counters.torn_down(), counters.cleanups()), (5, 1));
    feature.cleanup();
    assert_eq!((counters.torn_down(), counters.cleanups()), (5, 1));
    assert_eq!(count(&tab.document, ".reel-controls"), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_activation_is_contained() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime
        .register(
            "exploding",
            |_| -> Result<FailingScan, EngineError> { panic!("factory bug") },
            FeatureOptions::builder().priority(3).build(),
        )
        .unwrap()
        .register("failing", |_| Ok(FailingScan), FeatureOptions::builder().priority(2).build())
        .unwrap()
        .register("healthy", BodyClass::factory(&order), FeatureOptions::default())
        .unwrap();

    tab.runtime.initialize().await.unwrap();
    assert_eq!(tab.runtime.active_features(), [FeatureId::parse("healthy").unwrap()]);

    let err = tab.runtime.enable_feature("exploding", true).await.unwrap_err();
    assert!(matches!(err, EngineError::Activation { .. }));
    let err = tab.runtime.enable_feature("failing", true).await.unwrap_err();
    assert!(matches!(err, EngineError::Activation { .. }));
    assert!(!area.snapshot().contains_key(&flag("failing")), "failed activations persist nothing");
}

#[tokio::test(start_paused = true)]
async fn persistence_failures_keep_the_optimistic_state_until_reconciled() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime
        .register("focus", BodyClass::factory(&order), FeatureOptions::builder().default_enabled(false).build())
        .unwrap();
    tab.runtime.initialize().await.unwrap();

    area.set_unreachable(true);
    let err = tab.runtime.enable_feature("focus", true).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { .. }));
    assert!(tab.runtime.is_feature_enabled("focus"));

    // Retries keep failing while the store is away.
    tokio::time::sleep(tab.runtime.settings().reconcile_retry() * 3).await;
    assert!(tab.runtime.is_feature_enabled("focus"));

    // The first successful read restores the stored state.
    area.set_unreachable(false);
    tokio::time::sleep(tab.runtime.settings().reconcile_retry() * 2).await;
    assert!(!tab.runtime.is_feature_enabled("focus"));
    assert!(!has_body_class(&tab.document, "focus"));
    assert_eq!(tab.runtime.reconcile().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_toggle_restores_the_local_state_in_every_tab() {
    let area = MemoryArea::new();
    let tabs = [tab(&area), tab(&area)];
    let order = Arc::new(Mutex::new(Vec::new()));
    for tab in &tabs {
        tab.runtime
            .register("focus", BodyClass::factory(&order), FeatureOptions::builder().default_enabled(false).build())
            .unwrap();
        tab.runtime.initialize().await.unwrap();
    }

    area.set_unreachable(true);
    let err = tabs[0].runtime.toggle_feature("focus").await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { .. }));
    assert!(!tabs[0].runtime.is_feature_enabled("focus"));
    assert!(!has_body_class(&tabs[0].document, "focus"));

    area.set_unreachable(false);
    for _ in 0..20 {
        settle(&tabs[0].document).await;
    }
    let stored = tabs[1].runtime.store().get(&flag("focus"), false).await.unwrap();
    assert!(!stored);
    for tab in &tabs {
        assert_eq!(tab.runtime.is_feature_enabled("focus"), stored);
    }

    // A toggle that reaches the store still flips every tab.
    assert!(tabs[0].runtime.toggle_feature("focus").await.unwrap());
    settle(&tabs[1].document).await;
    assert!(tabs[1].runtime.is_feature_enabled("focus"));
}

#[tokio::test(start_paused = true)]
async fn tabs_converge_through_the_shared_store() {
    let area = MemoryArea::new();
    let tabs = [tab(&area), tab(&area)];
    let counters = [Counters::new(), Counters::new()];
    for (tab, tab_counters) in tabs.iter().zip(&counters) {
        add_video(&tab.document, tab.feed);
        tab.runtime.register_element("buttons", SlotButton::factory(Slot::Download, tab_counters), element_options(0)).unwrap();
        tab.runtime.initialize().await.unwrap();
    }

    tabs[0].runtime.disable_feature("buttons", true).await.unwrap();
    settle(&tabs[1].document).await;
    assert!(!tabs[1].runtime.is_feature_enabled("buttons"));
    assert_eq!(count(&tabs[1].document, "button"), 0);

    assert!(tabs[1].runtime.toggle_feature("buttons").await.unwrap());
    settle(&tabs[0].document).await;
    assert!(tabs[0].runtime.is_feature_enabled("buttons"));
    assert_eq!(count(&tabs[0].document, "button"), 1);
    // One instance per activation; no feedback loop.
    assert_eq!(counters[0].created(), 2);
    assert_eq!(counters[1].created(), 2);
}

#[tokio::test(start_paused = true)]
async fn reload_on_toggle_features_reload_the_tab() {
    let area = MemoryArea::new();
    let tabs = [tab(&area), tab(&area)];
    let order = Arc::new(Mutex::new(Vec::new()));
    let reloading = FeatureOptions::builder().traits(FeatureTraits::RELOAD_ON_TOGGLE).build();
    for tab in &tabs {
        tab.runtime
            .register("theme", BodyClass::factory(&order), reloading)
            .unwrap()
            .register("focus", BodyClass::factory(&order), FeatureOptions::default())
            .unwrap();
        tab.runtime.initialize().await.unwrap();
    }
    order.lock().clear();

    tabs[0].runtime.disable_feature("theme", true).await.unwrap();
    settle(&tabs[1].document).await;

    assert!(!tabs[1].runtime.is_feature_enabled("theme"));
    assert!(has_body_class(&tabs[1].document, "focus"));
    // Tab 1 rebuilt `focus` as part of its reload.
    assert_eq!(*order.lock(), ["focus"]);
}

#[tokio::test(start_paused = true)]
async fn suspension_tears_down_without_touching_flags() {
    let area = MemoryArea::new();
    let tabs = [tab(&area), tab(&area)];
    let order = Arc::new(Mutex::new(Vec::new()));
    for tab in &tabs {
        tab.runtime.register("focus", BodyClass::factory(&order), FeatureOptions::default()).unwrap();
        tab.runtime.initialize().await.unwrap();
    }

    tabs[0].runtime.set_suspended(true).await.unwrap();
    settle(&tabs[1].document).await;
    for tab in &tabs {
        assert!(tab.runtime.is_suspended());
        assert!(!tab.runtime.is_feature_enabled("focus"));
        assert!(!has_body_class(&tab.document, "focus"));
    }

    // While suspended only the flag changes.
    tabs[0].runtime.disable_feature("focus", true).await.unwrap();
    tabs[0].runtime.enable_feature("focus", true).await.unwrap();
    assert!(!tabs[0].runtime.is_feature_enabled("focus"));

    tabs[1].runtime.set_suspended(false).await.unwrap();
    settle(&tabs[0].document).await;
    for tab in &tabs {
        assert!(!tab.runtime.is_suspended());
        assert!(tab.runtime.is_feature_enabled("focus"));
    }
    assert_eq!(area.snapshot().get(SUSPEND_KEY), Some(&json!(false)));
}

#[tokio::test(start_paused = true)]
async fn state_events_report_transitions() {
    let tab = tab(&MemoryArea::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime.register("focus", BodyClass::factory(&order), FeatureOptions::default()).unwrap();
    let mut events = tab.runtime.state_events();

    tab.runtime.initialize().await.unwrap();
    tab.runtime.disable_feature("focus", false).await.unwrap();

    let focus = FeatureId::parse("focus").unwrap();
    assert_eq!(events.recv().await.unwrap(), FeatureStateChanged { id: focus.clone(), active: true });
    assert_eq!(events.recv().await.unwrap(), FeatureStateChanged { id: focus, active: false });
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_syncing() {
    let area = MemoryArea::new();
    let tab = tab(&area);
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime.register("focus", BodyClass::factory(&order), FeatureOptions::default()).unwrap();
    tab.runtime.initialize().await.unwrap();

    tab.runtime.shutdown().await;
    assert_eq!(tab.runtime.stats().active, 0);

    let writer = store_over(&area);
    writer.set(&flag("focus"), &true).await.unwrap();
    writer.set(&flag("focus"), &false).await.unwrap();
    writer.set(&flag("focus"), &true).await.unwrap();
    settle(&tab.document).await;
    assert!(!tab.runtime.is_feature_enabled("focus"));
}

#[tokio::test(start_paused = true)]
async fn bus_commands_drive_every_matching_tab() {
    let area = MemoryArea::new();
    let bus = TabBus::new();
    let origin = Origin::parse("https://video.example").unwrap();
    let tab = tab(&area);
    let order = Arc::new(Mutex::new(Vec::new()));
    tab.runtime.register("focus", BodyClass::factory(&order), FeatureOptions::default()).unwrap();
    tab.runtime.initialize().await.unwrap();
    let _channel = ControlChannel::spawn(tab.runtime.clone(), bus.connect(origin.clone()).unwrap());

    let settings = SettingsClient::new(
        store_over(&area),
        bus.connect(Origin::parse("https://settings.example").unwrap()).unwrap(),
        OriginPattern::parse("https://*.example").unwrap(),
    );

    assert_eq!(settings.set_feature_enabled("focus", false).await.unwrap(), 1);
    settle(&tab.document).await;
    assert!(!tab.runtime.is_feature_enabled("focus"));
    assert!(!settings.is_feature_enabled("focus", true).await.unwrap());

    assert!(settings.toggle_feature("focus", true).await.unwrap());
    settle(&tab.document).await;
    assert!(tab.runtime.is_feature_enabled("focus"));
    assert_eq!(settings.ping(), 1);
}
