//! Signal filtering: exclusion, throttling, masking.

use chrono::{DateTime, Utc};

use crate::config::RecorderConfig;
use crate::dom::{DomHost, NodeId, SelectorList};
use crate::session::{EventKind, EventPayload, KeyPayload, SessionEvent};

use super::fingerprint::ElementFingerprint;
use super::signal::RawSignal;
use super::throttle::ThrottleSet;

/// Replacement for both `key` and `code` on password fields.
pub const MASKED_KEY: &str = "*";

/// Turns raw signals into canonical events.
///
/// Stateless apart from the throttle windows; the recorder owns the session
/// and decides whether one is open.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    exclusions: Vec<SelectorList>,
    throttles: ThrottleSet,
    capture_mouse_move: bool,
}

impl CapturePipeline {
    pub fn new(config: &RecorderConfig) -> Self {
        let exclusions = config
            .exclude_element_selectors
            .iter()
            .filter_map(|selector| match SelectorList::parse(selector) {
                Ok(list) => Some(list),
                Err(e) => {
                    tracing::debug!(selector = %selector, error = %e, "Ignoring invalid exclusion selector");
                    None
                }
            })
            .collect();

        let throttles = ThrottleSet::new()
            .with_window(EventKind::MouseMove, config.throttle_mouse_move_ms)
            .with_window(EventKind::MouseScroll, config.throttle_scroll_ms)
            .with_window(EventKind::Resize, config.throttle_resize_ms);

        Self {
            exclusions,
            throttles,
            capture_mouse_move: config.capture_mouse_move,
        }
    }

    /// Clear throttle windows, e.g. when a new session opens.
    pub fn reset(&mut self) {
        self.throttles.reset();
    }

    /// Run one signal through the pipeline. `None` means the signal was dropped.
    pub fn process<H: DomHost + ?Sized>(
        &mut self,
        host: &H,
        signal: &RawSignal,
        now: DateTime<Utc>,
    ) -> Option<SessionEvent> {
        let kind = signal.kind();
        if kind == EventKind::MouseMove && !self.capture_mouse_move {
            return None;
        }

        let target = signal
            .target()
            .or_else(|| signal.position().and_then(|p| host.element_at_point(p)));

        if let Some(node) = target {
            if self.is_excluded(host, node) {
                tracing::debug!(kind = %kind, "Dropping event on excluded element");
                return None;
            }
        }

        if !self.throttles.admit(kind, now) {
            return None;
        }

        let fingerprint = target.and_then(|node| ElementFingerprint::of(host, node));
        let masked = target.is_some_and(|node| is_password_field(host, node));

        let payload = match signal {
            RawSignal::PointerMove { position, .. } => EventPayload::MouseMove {
                x: position.x,
                y: position.y,
                target: fingerprint,
            },
            RawSignal::Click {
                position, button, ..
            } => EventPayload::MouseClick {
                x: position.x,
                y: position.y,
                button: *button,
                target: fingerprint,
            },
            RawSignal::Scroll { offset, .. } => EventPayload::MouseScroll {
                x: offset.x,
                y: offset.y,
                target: fingerprint,
            },
            RawSignal::KeyDown {
                key,
                code,
                modifiers,
                ..
            } => EventPayload::KeyDown(key_payload(key, code, *modifiers, fingerprint, masked)),
            RawSignal::KeyUp {
                key,
                code,
                modifiers,
                ..
            } => EventPayload::KeyUp(key_payload(key, code, *modifiers, fingerprint, masked)),
            RawSignal::Resize { width, height } => EventPayload::Resize {
                width: *width,
                height: *height,
            },
            RawSignal::Navigation { url, from } => EventPayload::Navigation {
                url: url.clone(),
                from: from.clone(),
            },
            RawSignal::Custom { name, data } => EventPayload::Custom {
                name: name.clone(),
                data: data.clone(),
            },
        };

        Some(SessionEvent::new(now, payload))
    }

    fn is_excluded<H: DomHost + ?Sized>(&self, host: &H, node: NodeId) -> bool {
        if self.exclusions.is_empty() {
            return false;
        }
        let mut current = Some(node);
        while let Some(candidate) = current {
            if host.is_element(candidate)
                && self.exclusions.iter().any(|list| list.matches(host, candidate))
            {
                return true;
            }
            current = host.parent_element(candidate);
        }
        false
    }
}

fn key_payload(
    key: &str,
    code: &str,
    modifiers: crate::session::KeyModifiers,
    target: Option<ElementFingerprint>,
    masked: bool,
) -> KeyPayload {
    let (key, code) = if masked {
        (MASKED_KEY.to_string(), MASKED_KEY.to_string())
    } else {
        (key.to_string(), code.to_string())
    };
    KeyPayload {
        key,
        code,
        modifiers,
        target,
    }
}

fn is_password_field<H: DomHost + ?Sized>(host: &H, node: NodeId) -> bool {
    host.tag_name(node) == Some("input")
        && host
            .attribute(node, "type")
            .is_some_and(|t| t.eq_ignore_ascii_case("password"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, Rect};
    use chrono::Duration;

    fn fixture() -> Document {
        let mut doc = Document::parse(
            r#"<html><body>
                <form id="login">
                    <input id="user" type="text">
                    <input id="pw" type="password">
                </form>
                <div class="secret"><p><input id="ssn"></p></div>
            </body></html>"#,
        );
        let user = doc.query_selector("#user").unwrap().unwrap();
        doc.set_layout(user, Rect::new(0.0, 0.0, 200.0, 20.0));
        doc
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(ms)
    }

    #[test]
    fn password_keys_are_masked() {
        let doc = fixture();
        let pw = doc.query_selector("#pw").unwrap().unwrap();
        let mut pipeline = CapturePipeline::new(&RecorderConfig::default());

        let event = pipeline
            .process(&doc, &RawSignal::key_down("h", "KeyH", pw), at(0))
            .unwrap();
        match event.payload {
            EventPayload::KeyDown(key) => {
                assert_eq!(key.key, MASKED_KEY);
                assert_eq!(key.code, MASKED_KEY);
                assert_eq!(key.target.unwrap().id.as_deref(), Some("pw"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn excluded_ancestor_suppresses_event() {
        let doc = fixture();
        let ssn = doc.query_selector("#ssn").unwrap().unwrap();
        let config = RecorderConfig {
            exclude_element_selectors: vec!["[[bad".to_string(), ".secret".to_string()],
            ..RecorderConfig::default()
        };
        let mut pipeline = CapturePipeline::new(&config);

        assert!(pipeline
            .process(&doc, &RawSignal::key_down("1", "Digit1", ssn), at(0))
            .is_none());
        let user = doc.query_selector("#user").unwrap().unwrap();
        assert!(pipeline
            .process(&doc, &RawSignal::key_down("a", "KeyA", user), at(1))
            .is_some());
    }

    #[test]
    fn pointer_signals_are_hit_tested() {
        let doc = fixture();
        let mut pipeline = CapturePipeline::new(&RecorderConfig::default());
        let event = pipeline
            .process(&doc, &RawSignal::click(5.0, 5.0), at(0))
            .unwrap();
        assert_eq!(
            event.payload.target().and_then(|t| t.id.as_deref()),
            Some("user")
        );
    }

    #[test]
    fn mouse_moves_are_throttled_and_optional() {
        let doc = fixture();
        let mut pipeline = CapturePipeline::new(&RecorderConfig::default());
        let emitted = (0..10)
            .filter(|i| {
                pipeline
                    .process(&doc, &RawSignal::pointer_move(1.0, 1.0), at(*i * 10))
                    .is_some()
            })
            .count();
        // 0..90ms with a 50ms window: admitted at 0 and 50.
        assert_eq!(emitted, 2);

        let mut off = CapturePipeline::new(&RecorderConfig {
            capture_mouse_move: false,
            ..RecorderConfig::default()
        });
        assert!(off
            .process(&doc, &RawSignal::pointer_move(1.0, 1.0), at(0))
            .is_none());
    }
}
