//! Fixture pages and a deterministic clock.

use chrono::{DateTime, TimeZone, Utc};
use pagetape::dom::{Document, DomHost, NodeId, Rect};
use pagetape::{ManualClock, PageContext, RecorderConfig};

pub const PAGE_URL: &str = "https://shop.test/checkout";

pub const CHECKOUT_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Checkout</title>
  <link rel="stylesheet" href="/site.css">
  <link rel="stylesheet" href="/missing.css">
  <script src="/app.js"></script>
</head>
<body>
  <form id="checkout">
    <input id="email" type="email" name="email">
    <input id="password" type="password" name="password">
    <div class="secret"><input id="card" name="card"></div>
    <input id="terms" type="checkbox">
    <button id="pay" class="primary">Pay</button>
  </form>
  <img id="logo" src="https://cdn.elsewhere.test/logo.png">
</body>
</html>"#;

/// A fixed, whole-second start time.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid fixture time")
}

pub fn clock() -> ManualClock {
    ManualClock::new(epoch())
}

/// The checkout page with layout for the form controls.
pub fn checkout_document() -> Document {
    let mut doc = Document::parse(CHECKOUT_PAGE);
    doc.set_url(PAGE_URL);
    doc.set_viewport(Rect::new(0.0, 0.0, 1280.0, 800.0));
    for (selector, y) in [
        ("#email", 10.0),
        ("#password", 40.0),
        ("#card", 70.0),
        ("#terms", 100.0),
        ("#pay", 130.0),
    ] {
        let node = node(&doc, selector);
        doc.set_layout(node, Rect::new(10.0, y, 200.0, 20.0));
    }
    doc
}

pub fn node(doc: &Document, selector: &str) -> NodeId {
    doc.query_selector(selector)
        .expect("valid selector")
        .unwrap_or_else(|| panic!("fixture has no {selector}"))
}

pub fn page() -> PageContext {
    PageContext {
        url: Some(PAGE_URL.to_string()),
        title: Some("Checkout".to_string()),
        user_agent: Some("pagetape-tests".to_string()),
        ..PageContext::default()
    }
}

/// Recorder settings with timers off and no snapshot.
pub fn quiet_config() -> RecorderConfig {
    RecorderConfig {
        capture_html: false,
        save_interval_seconds: 0,
        max_duration_seconds: 0,
        ..RecorderConfig::default()
    }
}
