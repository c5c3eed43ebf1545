use reel_store::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;

fn store_over(area: &MemoryArea) -> KeyValueStore {
    KeyValueStore::builder().area(area.clone()).connect().unwrap()
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<StoreEvent>) -> StoreEvent {
    timeout(Duration::from_secs(1), events.recv()).await.expect("event in time").unwrap()
}

#[tokio::test]
async fn missing_key_yields_default() {
    let store = store_over(&MemoryArea::new());
    assert_eq!(store.get("feature:missing", 7u32).await.unwrap(), 7);
    assert_eq!(store.get_raw("feature:missing").await.unwrap(), None);
}

#[tokio::test]
async fn repeated_reads_hit_the_cache() {
    let area = MemoryArea::new();
    area.set_many(vec![("feature:a".into(), json!(true))]).await.unwrap();
    let before = area.round_trips();
    let store = store_over(&area);

    for _ in 0..5 {
        assert!(store.get("feature:a", false).await.unwrap());
    }
    assert_eq!(area.round_trips() - before, 1);

    // Absences are cached too.
    store.get("feature:b", false).await.unwrap();
    store.get("feature:b", false).await.unwrap();
    assert_eq!(area.round_trips() - before, 2);
}

#[tokio::test]
async fn cached_values_expire_after_ttl() {
    let area = MemoryArea::new();
    let store = KeyValueStore::builder()
        .area(area.clone())
        .cache_ttl(Duration::from_millis(30))
        .connect()
        .unwrap();

    store.get("feature:a", false).await.unwrap();
    store.get("feature:a", false).await.unwrap();
    assert_eq!(area.round_trips(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    store.get("feature:a", false).await.unwrap();
    assert_eq!(area.round_trips(), 2);
}

#[tokio::test]
async fn reads_observe_own_writes() {
    let store = store_over(&MemoryArea::new());
    assert!(!store.get("feature:focus-mode", false).await.unwrap());

    store.set("feature:focus-mode", &true).await.unwrap();
    assert!(store.get("feature:focus-mode", false).await.unwrap());

    store.remove("feature:focus-mode").await.unwrap();
    assert!(!store.get("feature:focus-mode", false).await.unwrap());
}

#[tokio::test]
async fn changes_from_another_tab_invalidate_the_cache() {
    let area = MemoryArea::new();
    let settings = store_over(&area);
    let tab = store_over(&area);
    let mut events = tab.subscribe();

    assert!(!tab.get("feature:download", false).await.unwrap());
    settings.set("feature:download", &true).await.unwrap();

    let StoreEvent::Changed(change) = next_event(&mut events).await else {
        panic!("expected a change event");
    };
    assert_eq!(change.key, "feature:download");
    assert_eq!(change.old_value, None);
    assert_eq!(change.new_value, Some(json!(true)));

    assert!(tab.get("feature:download", false).await.unwrap());
}

#[tokio::test]
async fn unchanged_writes_emit_nothing() {
    let area = MemoryArea::new();
    let store = store_over(&area);
    let mut events = store.subscribe();

    store.set("k", &1).await.unwrap();
    store.set("k", &1).await.unwrap();
    store.set("k", &2).await.unwrap();

    let StoreEvent::Changed(first) = next_event(&mut events).await else { panic!() };
    let StoreEvent::Changed(second) = next_event(&mut events).await else { panic!() };
    assert_eq!(first.new_value, Some(json!(1)));
    assert_eq!(second.old_value, Some(json!(1)));
    assert_eq!(second.new_value, Some(json!(2)));
}

#[tokio::test]
async fn get_multiple_uses_one_round_trip_for_misses() {
    let area = MemoryArea::new();
    area.set_many(vec![("feature:a".into(), json!(true)), ("feature:c".into(), json!(false))])
        .await
        .unwrap();
    let store = store_over(&area);
    store.get("feature:a", false).await.unwrap();
    let before = area.round_trips();

    let resolved = store
        .get_multiple([
            ("feature:a".to_owned(), json!(false)),
            ("feature:b".to_owned(), json!(true)),
            ("feature:c".to_owned(), json!(true)),
        ])
        .await
        .unwrap();

    assert_eq!(area.round_trips() - before, 1);
    assert_eq!(resolved["feature:a"], json!(true));
    assert_eq!(resolved["feature:b"], json!(true));
    assert_eq!(resolved["feature:c"], json!(false));

    // Everything is cached now.
    store.get_multiple([("feature:b".to_owned(), Value::Null)]).await.unwrap();
    assert_eq!(area.round_trips() - before, 1);
}

#[tokio::test]
async fn unreachable_area_surfaces_errors() {
    let area = MemoryArea::new();
    let store = store_over(&area);
    area.set_unreachable(true);

    assert!(matches!(store.get("k", 0).await, Err(StoreError::Unreachable { .. })));
    assert!(matches!(store.set("k", &1).await, Err(StoreError::Unreachable { .. })));

    area.set_unreachable(false);
    store.set("k", &1).await.unwrap();
    assert_eq!(store.get("k", 0).await.unwrap(), 1);
}

#[tokio::test]
async fn quota_rejects_oversized_writes() {
    let area = MemoryArea::new().with_quota(32);
    let store = store_over(&area);

    store.set("small", &1).await.unwrap();
    let err = store.set("large", &"x".repeat(64)).await.unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    assert_eq!(store.get_raw("large").await.unwrap(), None);
}

#[tokio::test]
async fn invalid_keys_are_rejected() {
    let store = store_over(&MemoryArea::new());
    assert!(matches!(store.get("", 0).await, Err(StoreError::InvalidKey { .. })));
    let long = "k".repeat(MAX_KEY_LEN + 1);
    assert!(matches!(store.set(&long, &0).await, Err(StoreError::InvalidKey { .. })));
}

#[tokio::test]
async fn mistyped_values_fail_to_decode() {
    let store = store_over(&MemoryArea::new());
    store.set("feature:a", &"yes").await.unwrap();
    assert!(matches!(store.get("feature:a", false).await, Err(StoreError::Serialization { .. })));
}

#[tokio::test]
async fn namespaces_prefix_keys() {
    let store = store_over(&MemoryArea::new());
    let prefs = store.namespace("Pref:Playback-Speed").unwrap();
    assert_eq!(prefs.name(), "pref:playback-speed");

    prefs.set("rate", &1.25).await.unwrap();
    assert_eq!(store.get("pref:playback-speed:rate", 0.0).await.unwrap(), 1.25);
    assert_eq!(prefs.get("rate", 0.0).await.unwrap(), 1.25);
    assert_eq!(prefs.strip("pref:playback-speed:rate"), Some("rate"));
    assert_eq!(prefs.strip("pref:download:rate"), None);

    assert!(store.namespace("bad name").is_err());
}

#[tokio::test]
async fn change_listener_stops_after_removal() {
    let area = MemoryArea::new();
    let store = store_over(&area);
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&seen);
    let listener = store.add_change_listener(move |event: &StoreEvent| {
        if matches!(event, StoreEvent::Changed(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    store.set("k", &1).await.unwrap();
    timeout(Duration::from_secs(1), async {
        while seen.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    listener.remove();
    store.set("k", &2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lagging_change_stream_resyncs() {
    let area = MemoryArea::with_change_capacity(1);
    let store = store_over(&area);
    let mut events = store.subscribe();
    store.get("a", 0).await.unwrap();
    let before = area.round_trips();

    // No yield between writes: the forwarder falls behind.
    for key in ["a", "b", "c"] {
        area.set_many(vec![(key.into(), json!(1))]).await.unwrap();
    }

    assert_eq!(next_event(&mut events).await, StoreEvent::Resynced);
    let StoreEvent::Changed(change) = next_event(&mut events).await else { panic!() };
    assert_eq!(change.key, "c");

    store.get("a", 0).await.unwrap();
    assert_eq!(area.round_trips() - before, 4);
}

#[test]
fn connect_requires_a_runtime() {
    let result = KeyValueStore::builder().area(MemoryArea::new()).connect();
    assert!(matches!(result, Err(StoreError::NoRuntime { .. })));
}
