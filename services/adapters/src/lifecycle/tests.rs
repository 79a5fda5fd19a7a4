use super::*;
use crate::input::AdapterEvent;
use crate::rate_limit::SubstringDetector;
use crate::testing::{Harness, OpenPlan};
use std::time::Duration;
use tokio::time::advance;
use types::{Badge, ChatMessage, EventKind, FailureClassification};

fn target() -> ConnectionTarget {
    ConnectionTarget::new(Platform::Twitch, "#streamer").unwrap()
}

fn spawn_with(
    harness: &Harness,
    settings: LifecycleSettings,
) -> (LifecycleManager, mpsc::Receiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let manager = LifecycleManager::spawn(
        ManagerOptions::new(target(), settings),
        harness.factory(),
        tx,
    );
    (manager, rx)
}

fn spawn(harness: &Harness) -> (LifecycleManager, mpsc::Receiver<ConnectionEvent>) {
    spawn_with(harness, LifecycleSettings::for_platform(Platform::Twitch))
}

fn chat(text: &str) -> AdapterEvent {
    AdapterEvent::Chat(ChatMessage {
        platform: Platform::Twitch,
        user_id: "42".into(),
        username: "viewer".into(),
        display_name: "Viewer".into(),
        message: text.into(),
        timestamp_ms: 0,
        profile_picture_url: None,
        badges: vec![Badge { id: "subscriber/1".into(), name: None }],
        is_mod: Some(false),
        is_subscriber: Some(true),
        metadata: None,
    })
}

fn fatal(reason: &str) -> AdapterEvent {
    AdapterEvent::Fatal(reason.to_string())
}

/// Let the lifecycle task run until `done` holds
async fn settle(done: impl Fn() -> bool) {
    while !done() {
        tokio::task::yield_now().await;
    }
}

async fn expect_connect(events: &mut mpsc::Receiver<ConnectionEvent>) -> ChannelInfo {
    match events.recv().await.unwrap().kind {
        EventKind::Connected { channel_info } | EventKind::Reconnected { channel_info } => {
            channel_info
        }
        other => panic!("expected a connect event, got {:?}", other),
    }
}

async fn expect_disconnect(
    events: &mut mpsc::Receiver<ConnectionEvent>,
) -> (String, FailureClassification, bool, Option<u64>) {
    match events.recv().await.unwrap().kind {
        EventKind::Disconnected {
            reason_text,
            classification,
            terminal,
            retry_in_ms,
        } => (reason_text, classification, terminal, retry_in_ms),
        other => panic!("expected Disconnected, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn early_drop_is_not_retried() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    let info = manager.connect().await.unwrap();
    assert_eq!(info.target, "streamer");
    assert_eq!(info.source, FeedSource::Primary);
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;
    assert_eq!(manager.state(), LifecycleState::Verifying);

    advance(Duration::from_millis(1_500)).await;
    feed.send(fatal("socket closed")).await.unwrap();

    let (reason, classification, terminal, retry_in) = expect_disconnect(&mut events).await;
    assert_eq!(reason, "socket closed");
    assert_eq!(classification, FailureClassification::UnstableEarlyDrop);
    assert!(terminal);
    assert_eq!(retry_in, None);
    assert_eq!(
        manager.state(),
        LifecycleState::Disconnected("socket closed".to_string())
    );
    assert_eq!(manager.retry_state().attempt_count, 0);

    advance(Duration::from_secs(120)).await;
    assert_eq!(harness.opens(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stable_drop_reconnects_after_initial_delay() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    advance(Duration::from_secs(15)).await;
    feed.send(fatal("network error")).await.unwrap();

    let (reason, classification, terminal, retry_in) = expect_disconnect(&mut events).await;
    assert_eq!(reason, "network error");
    assert_eq!(classification, FailureClassification::StableThenLost);
    assert!(!terminal);
    assert_eq!(retry_in, Some(1_000));
    assert_eq!(manager.state(), LifecycleState::Reconnecting);

    let retry = manager.retry_state();
    assert_eq!(retry.attempt_count, 1);
    assert_eq!(retry.current_delay, Duration::from_millis(1_000));

    let _feed = harness.next_feed().await;
    match events.recv().await.unwrap().kind {
        EventKind::Reconnected { channel_info } => assert_eq!(channel_info.room_id.as_deref(), Some("room-1")),
        other => panic!("expected Reconnected, got {:?}", other),
    }
    assert_eq!(harness.opens(), 2);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn repeated_drops_exhaust_the_budget() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let mut feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    let expected_delays = [1_000, 2_000, 4_000, 8_000];
    for drop_number in 1..=5u32 {
        // Past min_stable, short of stable_confirm.
        advance(Duration::from_secs(4)).await;
        feed.send(fatal("network error")).await.unwrap();

        let (reason, classification, terminal, retry_in) = expect_disconnect(&mut events).await;
        assert_eq!(classification, FailureClassification::StableThenLost);

        if drop_number < 5 {
            assert!(!terminal, "drop {} must not be terminal", drop_number);
            assert_eq!(retry_in, Some(expected_delays[drop_number as usize - 1]));
            assert_eq!(manager.retry_state().attempt_count, drop_number);
            feed = harness.next_feed().await;
            expect_connect(&mut events).await;
        } else {
            assert!(terminal);
            assert!(reason.contains("Max reconnect attempts exceeded"), "{}", reason);
            assert!(matches!(manager.state(), LifecycleState::GivenUp(_)));
        }
    }

    advance(Duration::from_secs(120)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(harness.opens(), 5);
}

#[tokio::test(start_paused = true)]
async fn stable_uptime_resets_the_budget() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    advance(Duration::from_secs(4)).await;
    feed.send(fatal("network error")).await.unwrap();
    expect_disconnect(&mut events).await;
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;
    assert_eq!(manager.retry_state().attempt_count, 1);

    advance(Duration::from_secs(11)).await;
    settle(|| manager.retry_state().attempt_count == 0).await;
    assert_eq!(manager.state(), LifecycleState::Connected);

    feed.send(fatal("network error")).await.unwrap();
    let (_, _, terminal, retry_in) = expect_disconnect(&mut events).await;
    assert!(!terminal);
    assert_eq!(retry_in, Some(1_000));
    assert_eq!(manager.retry_state().attempt_count, 1);
}

#[tokio::test(start_paused = true)]
async fn first_content_promotes_to_connected() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;
    assert_eq!(manager.state(), LifecycleState::Verifying);

    feed.send(chat("first")).await.unwrap();
    match events.recv().await.unwrap().kind {
        EventKind::ChatMessage(message) => assert_eq!(message.message, "first"),
        other => panic!("expected chat, got {:?}", other),
    }
    assert_eq!(manager.state(), LifecycleState::Connected);
}

#[tokio::test(start_paused = true)]
async fn first_attempt_failure_is_returned_not_retried() {
    let harness = Harness::new(Platform::Twitch);
    harness.push(OpenPlan::Fail("channel not found".into()));
    let (manager, mut events) = spawn(&harness);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Handshake { .. }));
    assert_eq!(
        manager.state(),
        LifecycleState::Disconnected("channel not found".to_string())
    );

    advance(Duration::from_secs(60)).await;
    assert_eq!(harness.opens(), 1);
    assert_eq!(harness.closes(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn missing_precondition_fails_without_opening() {
    let harness = Harness::new(Platform::Twitch);
    harness.push(OpenPlan::MissingPrecondition("no browser".into()));
    let (manager, _events) = spawn(&harness);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Precondition { .. }));
    assert!(!err.consumes_retry());
    assert_eq!(harness.opens(), 0);
    assert_eq!(manager.retry_state().attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_handshake_times_out() {
    let harness = Harness::new(Platform::Twitch);
    harness.push(OpenPlan::Hang);
    let (manager, _events) = spawn(&harness);

    let err = manager.connect().await.unwrap_err();
    match err {
        LifecycleError::HandshakeTimeout { timeout_ms, .. } => assert_eq!(timeout_ms, 15_000),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(harness.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_in_flight_open() {
    let harness = Harness::new(Platform::Twitch);
    harness.push(OpenPlan::Hang);
    let (manager, _events) = spawn(&harness);
    let manager = Arc::new(manager);

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    while harness.opens() == 0 {
        tokio::task::yield_now().await;
    }

    manager.disconnect().await;
    assert_eq!(manager.state(), LifecycleState::Idle);

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(LifecycleError::Cancelled { .. })));
    assert_eq!(harness.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_closes_once() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let _feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(harness.closes(), 1);
    assert_eq!(manager.state(), LifecycleState::Idle);
    assert!(!manager.is_connected());
    assert!(!manager.retry_state().enabled);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_not_blocked_by_a_full_event_channel() {
    let mut harness = Harness::new(Platform::Twitch);
    let (tx, _events) = mpsc::channel(1);
    let manager = LifecycleManager::spawn(
        ManagerOptions::new(target(), LifecycleSettings::for_platform(Platform::Twitch)),
        harness.factory(),
        tx,
    );

    // Connected takes the only slot; nobody reads it.
    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    for text in ["one", "two", "three"] {
        feed.send(chat(text)).await.unwrap();
    }
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    let finished = tokio::time::timeout(Duration::from_secs(30), manager.disconnect()).await;
    assert!(finished.is_ok());
    assert_eq!(harness.closes(), 1);
    assert_eq!(manager.state(), LifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_vetoes_the_retry() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    advance(Duration::from_secs(15)).await;
    feed.send(fatal("network error")).await.unwrap();
    let (_, _, terminal, _) = expect_disconnect(&mut events).await;
    assert!(!terminal);

    manager.disconnect().await;
    advance(Duration::from_secs(60)).await;

    assert_eq!(harness.opens(), 1);
    assert_eq!(manager.state(), LifecycleState::Idle);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_is_terminal() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    harness.push(OpenPlan::Fail("streamer offline".into()));
    advance(Duration::from_secs(15)).await;
    feed.send(fatal("network error")).await.unwrap();
    let (_, _, terminal, _) = expect_disconnect(&mut events).await;
    assert!(!terminal);

    let (reason, classification, terminal, _) = expect_disconnect(&mut events).await;
    assert!(terminal);
    assert_eq!(reason, "streamer offline");
    assert_eq!(classification, FailureClassification::DuringBringUp);
    assert!(matches!(manager.state(), LifecycleState::Disconnected(_)));
    assert_eq!(harness.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_drop_is_classified_and_terminal() {
    let mut harness = Harness::new(Platform::TikTok);
    let (tx, mut events) = mpsc::channel(64);
    let mut options = ManagerOptions::new(
        ConnectionTarget::new(Platform::TikTok, "@someone").unwrap(),
        LifecycleSettings::for_platform(Platform::TikTok),
    );
    options.rate_limit = Some(Arc::new(SubstringDetector::new(["rate limit", "429"])));
    let manager = LifecycleManager::spawn(options, harness.factory(), tx);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    advance(Duration::from_secs(15)).await;
    feed.send(fatal("HTTP 429 from sign server")).await.unwrap();

    let (_, classification, terminal, retry_in) = expect_disconnect(&mut events).await;
    assert_eq!(classification, FailureClassification::RateLimited);
    assert!(terminal);
    assert_eq!(retry_in, None);

    advance(Duration::from_secs(60)).await;
    assert_eq!(harness.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_off_makes_stable_drops_terminal() {
    let mut harness = Harness::new(Platform::YouTube);
    let (tx, mut events) = mpsc::channel(64);
    let mut options = ManagerOptions::new(
        ConnectionTarget::new(Platform::YouTube, "dQw4w9WgXcQ").unwrap(),
        LifecycleSettings::for_platform(Platform::YouTube),
    );
    options.auto_reconnect = false;
    let manager = LifecycleManager::spawn(options, harness.factory(), tx);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    advance(Duration::from_secs(20)).await;
    feed.send(fatal("network error")).await.unwrap();
    let (_, classification, terminal, _) = expect_disconnect(&mut events).await;
    assert_eq!(classification, FailureClassification::StableThenLost);
    assert!(terminal);
    assert!(matches!(manager.state(), LifecycleState::Disconnected(_)));
}

#[tokio::test(start_paused = true)]
async fn stream_end_stops_without_retry() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    advance(Duration::from_secs(30)).await;
    feed.send(AdapterEvent::StreamEnded).await.unwrap();

    assert!(matches!(
        events.recv().await.unwrap().kind,
        EventKind::StreamEnded {}
    ));
    settle(|| manager.state().is_terminal()).await;
    advance(Duration::from_secs(60)).await;
    assert_eq!(
        manager.state(),
        LifecycleState::Disconnected("Stream ended".to_string())
    );
    assert_eq!(harness.opens(), 1);
    assert_eq!(harness.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_active_is_rejected() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let _feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyActive { .. }));
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_disconnect_starts_fresh() {
    let mut harness = Harness::new(Platform::Twitch);
    let (manager, mut events) = spawn(&harness);

    manager.connect().await.unwrap();
    let _feed = harness.next_feed().await;
    expect_connect(&mut events).await;
    manager.disconnect().await;

    manager.connect().await.unwrap();
    let _feed = harness.next_feed().await;
    expect_connect(&mut events).await;

    assert!(manager.retry_state().enabled);
    assert_eq!(manager.retry_state().attempt_count, 0);
    assert_eq!(harness.opens(), 2);
    assert_eq!(harness.closes(), 1);
}
