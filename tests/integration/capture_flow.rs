//! Integration tests for the capture side
//!
//! Raw signals go through the recorder and come out as persisted sessions.

use std::sync::Arc;

use super::common::fakes::{FailingStorage, MockFetcher};
use super::common::fixtures::{checkout_document, clock, node, page, quiet_config};
use pagetape::capture::MASKED_KEY;
use pagetape::session::{EventPayload, KeyPayload};
use pagetape::{
    EventKind, RawSignal, Recorder, RecorderConfig, RecorderError, SqliteStorage, StorageAdapter,
};
use tempfile::TempDir;

fn key_of(payload: &EventPayload) -> &KeyPayload {
    match payload {
        EventPayload::KeyDown(key) | EventPayload::KeyUp(key) => key,
        other => panic!("expected a key event, got {other:?}"),
    }
}

/// Excluded subtrees are dropped, passwords are masked and the result
/// survives a round trip through SQLite
#[tokio::test]
async fn test_recording_filters_masks_and_persists() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = Arc::new(SqliteStorage::open(dir.path().join("sessions.db")).unwrap());
    let clock = clock();
    let recorder = Recorder::builder(RecorderConfig {
        exclude_element_selectors: vec![".secret".to_string()],
        user_id: Some("shopper-7".to_string()),
        ..quiet_config()
    })
    .clock(Arc::new(clock.clone()))
    .storage(storage.clone())
    .fetcher(Arc::new(MockFetcher::new()))
    .build();
    let doc = checkout_document();

    let id = recorder.start(page(), &doc).await.unwrap();

    clock.advance_ms(100);
    assert!(recorder.handle_signal(&doc, &RawSignal::key_down("a", "KeyA", node(&doc, "#email"))));
    clock.advance_ms(100);
    assert!(
        !recorder.handle_signal(&doc, &RawSignal::key_down("4", "Digit4", node(&doc, "#card"))),
        "keys under .secret must not be recorded"
    );
    clock.advance_ms(100);
    assert!(recorder.handle_signal(&doc, &RawSignal::key_down("s", "KeyS", node(&doc, "#password"))));
    clock.advance_ms(100);
    // No target: resolved by hit-testing onto the Pay button.
    assert!(recorder.handle_signal(&doc, &RawSignal::click(15.0, 135.0)));
    clock.advance_ms(100);

    let session = recorder.stop().await.unwrap();
    assert_eq!(session.id(), id);

    let kinds: Vec<EventKind> = session.events().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![EventKind::KeyDown, EventKind::KeyDown, EventKind::MouseClick]
    );

    let email = key_of(&session.events()[0].payload);
    assert_eq!(email.key, "a");
    let password = key_of(&session.events()[1].payload);
    assert_eq!(password.key, MASKED_KEY);
    assert_eq!(password.code, MASKED_KEY);

    let pay = session.events()[2].payload.target().unwrap();
    assert_eq!(pay.id.as_deref(), Some("pay"));
    assert_eq!(pay.classes, vec!["primary".to_string()]);

    assert_eq!(session.event_offset_ms(0), Some(100.0));
    assert_eq!(session.event_offset_ms(2), Some(400.0));
    assert_eq!(
        session.duration(),
        Some(chrono::Duration::milliseconds(500))
    );

    // Reopen the database to make sure it really hit disk.
    drop(storage);
    let reopened = SqliteStorage::open(dir.path().join("sessions.db")).unwrap();
    let stored = reopened.get(id).await.unwrap().expect("session stored");
    assert_eq!(stored, session);

    let listed = reopened.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].event_count, 3);
    assert_eq!(listed[0].user_id.as_deref(), Some("shopper-7"));
}

/// A failing store does not lose the finalized session
#[tokio::test]
async fn test_stop_surfaces_storage_failure() {
    let storage = Arc::new(FailingStorage::default());
    let clock = clock();
    let recorder = Recorder::builder(quiet_config())
        .clock(Arc::new(clock.clone()))
        .storage(storage.clone())
        .fetcher(Arc::new(MockFetcher::new()))
        .build();
    let doc = checkout_document();

    recorder.start(page(), &doc).await.unwrap();
    clock.advance_ms(20);
    recorder.handle_signal(&doc, &RawSignal::click(15.0, 15.0));

    let result = recorder.stop().await;
    assert!(matches!(result, Err(RecorderError::Storage(_))));
    assert_eq!(*storage.attempts.lock(), 1);
    assert!(!recorder.is_recording());

    let kept = recorder.last_session().expect("session kept in memory");
    assert_eq!(kept.event_count(), 1);
    assert!(kept.is_finished());
}

/// Throttling keeps one pointer move per window while clicks pass through
#[tokio::test]
async fn test_pointer_moves_are_throttled_but_clicks_are_not() {
    let clock = clock();
    let recorder = Recorder::builder(RecorderConfig {
        throttle_mouse_move_ms: 50,
        ..quiet_config()
    })
    .clock(Arc::new(clock.clone()))
    .fetcher(Arc::new(MockFetcher::new()))
    .build();
    let doc = checkout_document();
    recorder.start(page(), &doc).await.unwrap();

    let mut recorded_moves = 0;
    for step in 0..10 {
        clock.advance_ms(10);
        if recorder.handle_signal(&doc, &RawSignal::pointer_move(20.0, 15.0 + step as f64)) {
            recorded_moves += 1;
        }
        assert!(recorder.handle_signal(&doc, &RawSignal::click(20.0, 15.0)));
    }

    // Moves at 10ms and 60ms open windows; the others fall inside one.
    assert_eq!(recorded_moves, 2);
    let session = recorder.stop().await.unwrap();
    assert_eq!(session.event_count(), 12);
}
