use reel_events::*;
use std::time::Duration;

fn origin(raw: &str) -> Origin {
    Origin::parse(raw).unwrap()
}

fn ping() -> Message {
    Message::new(MessageKind::Ping)
}

#[tokio::test]
async fn broadcast_reaches_matching_tabs_only() {
    let bus = TabBus::new();
    let mut feed = bus.connect(origin("https://www.example.com")).unwrap();
    let mut shorts = bus.connect(origin("https://m.example.com")).unwrap();
    let mut elsewhere = bus.connect(origin("https://other.org")).unwrap();

    let reached = bus.broadcast(&OriginPattern::parse("https://*.example.com").unwrap(), ping());
    assert_eq!(reached, 2);

    assert_eq!(feed.recv().await.unwrap().kind, MessageKind::Ping);
    assert_eq!(shorts.recv().await.unwrap().kind, MessageKind::Ping);
    assert!(elsewhere.try_recv().is_none());
}

#[tokio::test]
async fn broadcast_without_listeners_is_silent() {
    let bus = TabBus::new();
    assert_eq!(bus.broadcast(&OriginPattern::Any, ping()), 0);

    let tab = bus.connect(origin("https://example.com")).unwrap();
    drop(tab);
    assert_eq!(bus.tab_count(), 0);
    assert_eq!(bus.broadcast(&OriginPattern::Any, ping()), 0);
}

#[tokio::test]
async fn sender_is_not_echoed() {
    let bus = TabBus::new();
    let mut settings = bus.connect(origin("chrome-extension://reel")).unwrap();
    let mut tab = bus.connect(origin("https://example.com")).unwrap();

    assert_eq!(settings.send(&OriginPattern::Any, ping()), 1);
    let received = tab.recv().await.unwrap();
    assert_eq!(received.sender, Some(settings.id()));
    assert!(settings.try_recv().is_none());
}

#[tokio::test]
async fn lagged_tab_continues_from_fresh_tail() {
    let bus = TabBus::new();
    let mut tab = bus.connect_with_capacity(origin("https://example.com"), 2).unwrap();

    for i in 0..10u32 {
        bus.broadcast(&OriginPattern::Any, Message::with_payload(MessageKind::Ping, &i).unwrap());
    }

    let first = tab.recv().await.unwrap().payload::<u32>().unwrap();
    assert!(first >= 8, "expected the fresh tail, got {first}");
    let second = tab.recv().await.unwrap().payload::<u32>().unwrap();
    assert_eq!(second, first + 1);
}

#[tokio::test]
async fn shutdown_ends_streams_and_rejects_new_tabs() {
    let bus = TabBus::new();
    let mut tab = bus.connect(origin("https://example.com")).unwrap();

    bus.shutdown();
    let next = tokio::time::timeout(Duration::from_millis(100), tab.recv()).await.unwrap();
    assert!(next.is_none());
    assert!(matches!(bus.connect(origin("https://example.com")), Err(BusError::Closed { .. })));
}

#[tokio::test]
async fn send_to_targets_one_tab() {
    let bus = TabBus::new();
    let mut a = bus.connect(origin("https://example.com")).unwrap();
    let mut b = bus.connect(origin("https://example.com")).unwrap();

    assert!(bus.send_to(b.id(), ping()));
    assert!(b.recv().await.is_some());
    assert!(a.try_recv().is_none());
    assert_eq!(bus.tabs(&OriginPattern::Any), vec![a.id(), b.id()]);
}

#[test]
fn invalid_capacity_rejected() {
    let bus = TabBus::new();
    let result = bus.connect_with_capacity(origin("https://example.com"), 0);
    assert!(matches!(result, Err(BusError::InvalidCapacity { .. })));
}
