//! Integration tests for snapshot capture
//!
//! The recorder snapshots the page once at start; resources are fetched
//! through the fetcher seam and failures only degrade the failing resource.

use std::sync::Arc;

use super::common::fakes::MockFetcher;
use super::common::fixtures::{checkout_document, clock, page, quiet_config, PAGE_URL};
use pagetape::config::{OptimizationLevel, ScriptHandling};
use pagetape::{Document, DomHost, Recorder, RecorderConfig, SessionBundle};
use tempfile::TempDir;

const SITE_CSS: &str = "body { background: url(img/bg.png); }";
const APP_JS: &str = "window.booted = true;";

fn fetcher() -> Arc<MockFetcher> {
    Arc::new(
        MockFetcher::new()
            .with("https://shop.test/site.css", SITE_CSS)
            .with("https://shop.test/app.js", APP_JS),
    )
}

fn snapshot_config() -> RecorderConfig {
    RecorderConfig {
        capture_html: true,
        script_handling: ScriptHandling::KeepAll,
        exclude_element_selectors: vec![".secret".to_string()],
        ..quiet_config()
    }
}

/// One failing stylesheet leaves a comment while everything else is inlined
#[tokio::test]
async fn test_snapshot_inlines_resources_and_survives_failures() {
    let fetcher = fetcher();
    let recorder = Recorder::builder(snapshot_config())
        .clock(Arc::new(clock()))
        .fetcher(fetcher.clone())
        .build();
    let doc = checkout_document();
    let before = doc.to_html();

    recorder.start(page(), &doc).await.unwrap();
    let session = recorder.stop().await.unwrap();
    let html = &session.html().expect("snapshot captured").html;

    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains(r#"data-inlined-from="https://shop.test/site.css""#));
    assert!(html.contains("/* inlined from https://shop.test/site.css */"));
    assert!(html.contains("url(https://shop.test/img/bg.png)"));
    assert!(html.contains("// inlined from https://shop.test/app.js"));
    assert!(html.contains(APP_JS));
    assert!(
        html.contains("pagetape: failed to inline stylesheet https://shop.test/missing.css"),
        "failed stylesheet should leave a comment: {html}"
    );

    // Cross-origin image swapped for a placeholder.
    assert!(html.contains(r#"data-original-src="https://cdn.elsewhere.test/logo.png""#));
    assert!(html.contains("data:image/svg+xml;base64,"));

    // Excluded subtree is gone.
    assert!(!html.contains(r#"id="card""#));

    assert!(html.contains(r#"name="pagetape-snapshot""#));
    assert!(html.contains("2024-05-01T12:00:00.000Z"));

    assert_eq!(
        fetcher.requests(),
        vec![
            "https://shop.test/app.js".to_string(),
            "https://shop.test/missing.css".to_string(),
            "https://shop.test/site.css".to_string(),
        ]
    );

    // The live page is never modified.
    assert_eq!(doc.to_html(), before);
}

/// Optimization level 0 skips the resource pass entirely
#[tokio::test]
async fn test_level_zero_keeps_links_and_fetches_nothing() {
    let fetcher = fetcher();
    let config = RecorderConfig {
        optimization_level: OptimizationLevel::None,
        script_handling: ScriptHandling::Remove,
        ..snapshot_config()
    };
    let recorder = Recorder::builder(config)
        .clock(Arc::new(clock()))
        .fetcher(fetcher.clone())
        .build();
    let doc = checkout_document();

    recorder.start(page(), &doc).await.unwrap();
    let session = recorder.stop().await.unwrap();
    let html = &session.html().unwrap().html;

    assert!(html.contains(r#"href="/site.css""#));
    assert!(!html.contains("<script"));
    assert!(fetcher.requests().is_empty());
}

/// A removed link whose URL tries to close the removal comment stays inert
#[tokio::test]
async fn test_removal_comment_cannot_smuggle_scripts() {
    let config = RecorderConfig {
        script_handling: ScriptHandling::Remove,
        keep_external_resources: false,
        ..snapshot_config()
    };
    let recorder = Recorder::builder(config)
        .clock(Arc::new(clock()))
        .fetcher(fetcher())
        .build();
    let mut doc = Document::parse(
        r#"<html><head><link rel="stylesheet" href="https://evil.test/x---><script>alert(1)</script>"></head><body><p>hi</p></body></html>"#,
    );
    doc.set_url(PAGE_URL);

    recorder.start(page(), &doc).await.unwrap();
    let session = recorder.stop().await.unwrap();
    let html = &session.html().unwrap().html;

    assert!(html.contains("pagetape: external stylesheet removed"));
    let reparsed = Document::parse(html);
    assert!(reparsed.query_selector_all("script").unwrap().is_empty(), "{html}");
    assert!(reparsed.query_selector("p").unwrap().is_some());
}

/// A recorded session with a snapshot exports to a bundle and back
#[tokio::test]
async fn test_session_bundle_round_trip() {
    let recorder = Recorder::builder(snapshot_config())
        .clock(Arc::new(clock()))
        .fetcher(fetcher())
        .build();
    let doc = checkout_document();
    recorder.start(page(), &doc).await.unwrap();
    let session = recorder.stop().await.unwrap();

    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("checkout.zip");
    let meta = SessionBundle::create(&path, &session).unwrap();
    assert_eq!(meta.session_id, session.id());
    assert!(meta.snapshot_captured_at.is_some());

    let opened = SessionBundle::open(&path).unwrap();
    assert_eq!(opened.meta.event_count, 0);
    assert_eq!(opened.session, session);
}
