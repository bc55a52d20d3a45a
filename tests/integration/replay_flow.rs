//! Integration tests for replay
//!
//! Sessions recorded with a manual clock are replayed on tokio's paused
//! clock, so delivery times can be asserted exactly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::common::fakes::MockFetcher;
use super::common::fixtures::{
    checkout_document, clock, node, page, quiet_config, CHECKOUT_PAGE, PAGE_URL,
};
use pagetape::dom::DomHost;
use pagetape::replay::HOVER_ATTR;
use pagetape::{
    ContentOverrides, ContentSource, PlaybackState, RawSignal, Recorder, RecorderConfig,
    RecordingSession, ReplayConfig, SessionPlayer,
};

/// Record `signals` at the given offsets (ms from start).
async fn record(capture_html: bool, signals: Vec<(i64, RawSignal)>) -> RecordingSession {
    let clock = clock();
    let recorder = Recorder::builder(RecorderConfig {
        capture_html,
        ..quiet_config()
    })
    .clock(Arc::new(clock.clone()))
    .fetcher(Arc::new(MockFetcher::new()))
    .build();
    let doc = checkout_document();
    recorder.start(page(), &doc).await.unwrap();

    let mut elapsed = 0;
    for (at, signal) in signals {
        clock.advance_ms(at - elapsed);
        elapsed = at;
        assert!(recorder.handle_signal(&doc, &signal), "signal at {at}ms dropped");
    }
    recorder.stop().await.unwrap()
}

fn checkout_signals() -> Vec<(i64, RawSignal)> {
    let doc = checkout_document();
    vec![
        (
            0,
            RawSignal::Navigation {
                url: PAGE_URL.to_string(),
                from: None,
            },
        ),
        (
            500,
            RawSignal::Click {
                position: pagetape::Point::new(15.0, 105.0),
                button: Default::default(),
                target: Some(node(&doc, "#terms")),
            },
        ),
        (1500, RawSignal::pointer_move(15.0, 135.0)),
    ]
}

fn clicks(offsets: &[i64]) -> Vec<(i64, RawSignal)> {
    offsets
        .iter()
        .map(|at| (*at, RawSignal::click(15.0, 135.0)))
        .collect()
}

/// Log `(index, paused-clock instant)` for every delivered event.
fn delivery_log(player: &SessionPlayer) -> Arc<Mutex<Vec<(usize, Instant)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    player
        .scheduler()
        .on_event(move |index, _| sink.lock().push((index, Instant::now())));
    log
}

fn offsets_ms(log: &Mutex<Vec<(usize, Instant)>>, start: Instant) -> Vec<u128> {
    log.lock()
        .iter()
        .map(|(_, at)| (*at - start).as_millis())
        .collect()
}

fn player(config: ReplayConfig) -> SessionPlayer {
    SessionPlayer::new(config, Arc::new(MockFetcher::new())).unwrap()
}

/// At 2x, events recorded at 0/500/1500ms land at 0/250/750ms and drive
/// the sandbox
#[tokio::test(start_paused = true)]
async fn test_replay_at_double_speed() {
    let session = record(true, checkout_signals()).await;
    assert_eq!(session.event_count(), 3);

    let player = player(ReplayConfig {
        speed: 2.0,
        ..ReplayConfig::default()
    });
    let log = delivery_log(&player);
    let content = player
        .load(session, ContentOverrides::default())
        .await
        .unwrap();
    assert!(matches!(content, ContentSource::Html(_)));

    let start = Instant::now();
    player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(offsets_ms(&log, start), vec![0, 250, 750]);
    assert_eq!(player.state(), PlaybackState::Completed);

    player.with_sandbox(|sandbox| {
        let terms = sandbox.query_selector("#terms").unwrap().unwrap();
        let pay = sandbox.query_selector("#pay").unwrap().unwrap();
        assert!(sandbox.document().has_attribute(terms, "checked"));
        assert!(sandbox.document().has_attribute(pay, HOVER_ATTR));
        assert_eq!(sandbox.navigations(), [PAGE_URL.to_string()]);
        // Recorded snapshots never carry scripts into the sandbox.
        assert!(sandbox.query_selector("script").unwrap().is_none());
    });
}

/// Seeking then playing delivers exactly the tail from the resolved cursor
#[tokio::test(start_paused = true)]
async fn test_seek_delivers_subsequence() {
    let session = record(true, clicks(&[0, 100, 200, 300, 400])).await;
    let player = player(ReplayConfig::default());
    let log = delivery_log(&player);
    player
        .load(session, ContentOverrides::default())
        .await
        .unwrap();

    player.seek(250.0).unwrap();
    assert_eq!(player.status().cursor, 2);
    player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let indices: Vec<usize> = log.lock().iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![2, 3, 4]);

    // Seeking back from the end pauses at the new cursor.
    player.seek(100.0).unwrap();
    assert_eq!(player.state(), PlaybackState::Paused);
    assert_eq!(player.status().cursor, 1);
}

/// A speed change leaves the pending delay alone and scales the next ones
#[tokio::test(start_paused = true)]
async fn test_speed_change_mid_playback() {
    let session = record(true, clicks(&[0, 1000, 2000, 3000])).await;
    let player = player(ReplayConfig::default());
    let log = delivery_log(&player);
    player
        .load(session, ContentOverrides::default())
        .await
        .unwrap();

    let start = Instant::now();
    player.play().unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    player.set_speed(4.0).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(offsets_ms(&log, start), vec![0, 1000, 2000, 2250]);
}

/// Pausing holds the cursor; stop rewinds and restores the page
#[tokio::test(start_paused = true)]
async fn test_pause_resume_and_stop() {
    let session = record(true, checkout_signals()).await;
    let player = player(ReplayConfig::default());
    let log = delivery_log(&player);
    player
        .load(session, ContentOverrides::default())
        .await
        .unwrap();

    player.play().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    player.pause().unwrap();
    assert_eq!(player.state(), PlaybackState::Paused);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.lock().len(), 2);

    player.stop().unwrap();
    assert_eq!(player.status().cursor, 0);
    player.with_sandbox(|sandbox| {
        let terms = sandbox.query_selector("#terms").unwrap().unwrap();
        assert!(!sandbox.document().has_attribute(terms, "checked"));
    });

    player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.lock().len(), 5);
    assert_eq!(player.state(), PlaybackState::Completed);
}

/// Without a snapshot the recorded URL is fetched; overrides win over both
#[tokio::test]
async fn test_content_resolution_for_url_sessions() {
    let session = record(false, clicks(&[0])).await;
    assert!(session.html().is_none());

    let fetcher = Arc::new(MockFetcher::new().with(PAGE_URL, CHECKOUT_PAGE));
    let player = SessionPlayer::new(ReplayConfig::default(), fetcher.clone()).unwrap();
    let content = player
        .load(session.clone(), ContentOverrides::default())
        .await
        .unwrap();
    assert_eq!(content, ContentSource::Url(PAGE_URL.to_string()));
    assert_eq!(fetcher.requests(), vec![PAGE_URL.to_string()]);
    player.with_sandbox(|sandbox| {
        assert!(sandbox.query_selector("#pay").unwrap().is_some());
        assert_eq!(sandbox.document().url(), Some(PAGE_URL));
    });

    let overridden = player
        .load(
            session,
            ContentOverrides {
                html: Some("<main id=\"stub\"></main>".to_string()),
                url: Some("https://ignored.test/".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(matches!(overridden, ContentSource::Html(_)));
    player.with_sandbox(|sandbox| {
        assert!(sandbox.query_selector("#stub").unwrap().is_some());
    });
    assert_eq!(fetcher.requests().len(), 1);
}
