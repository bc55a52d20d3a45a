//! The recorded session artifact.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::ElementFingerprint;
use crate::dom::Point;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("event {index} at {next} is not after the previous event at {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },
    #[error("session {0} already has an HTML snapshot")]
    SnapshotAlreadyCaptured(Uuid),
    #[error("invalid session JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Discriminant of [`EventPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MouseMove,
    MouseClick,
    MouseScroll,
    KeyDown,
    KeyUp,
    Navigation,
    Resize,
    Custom,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MouseMove => "mouse_move",
            EventKind::MouseClick => "mouse_click",
            EventKind::MouseScroll => "mouse_scroll",
            EventKind::KeyDown => "key_down",
            EventKind::KeyUp => "key_up",
            EventKind::Navigation => "navigation",
            EventKind::Resize => "resize",
            EventKind::Custom => "custom",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyModifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPayload {
    pub key: String,
    pub code: String,
    #[serde(default)]
    pub modifiers: KeyModifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementFingerprint>,
}

/// Kind-specific event data. Pointer coordinates are client coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    MouseMove {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ElementFingerprint>,
    },
    MouseClick {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ElementFingerprint>,
    },
    /// Scroll offsets; `target` is the scrolled element, absent for the window.
    MouseScroll {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ElementFingerprint>,
    },
    KeyDown(KeyPayload),
    KeyUp(KeyPayload),
    Navigation {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::MouseMove { .. } => EventKind::MouseMove,
            EventPayload::MouseClick { .. } => EventKind::MouseClick,
            EventPayload::MouseScroll { .. } => EventKind::MouseScroll,
            EventPayload::KeyDown(_) => EventKind::KeyDown,
            EventPayload::KeyUp(_) => EventKind::KeyUp,
            EventPayload::Navigation { .. } => EventKind::Navigation,
            EventPayload::Resize { .. } => EventKind::Resize,
            EventPayload::Custom { .. } => EventKind::Custom,
        }
    }

    pub fn target(&self) -> Option<&ElementFingerprint> {
        match self {
            EventPayload::MouseMove { target, .. }
            | EventPayload::MouseClick { target, .. }
            | EventPayload::MouseScroll { target, .. } => target.as_ref(),
            EventPayload::KeyDown(key) | EventPayload::KeyUp(key) => key.target.as_ref(),
            EventPayload::Navigation { .. }
            | EventPayload::Resize { .. }
            | EventPayload::Custom { .. } => None,
        }
    }

    /// Pointer position for move and click events.
    pub fn position(&self) -> Option<Point> {
        match self {
            EventPayload::MouseMove { x, y, .. } | EventPayload::MouseClick { x, y, .. } => {
                Some(Point::new(*x, *y))
            }
            _ => None,
        }
    }
}

/// One canonical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl SessionEvent {
    pub fn new(timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self { timestamp, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportInfo {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for ViewportInfo {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            device_pixel_ratio: 1.0,
            screen_width: 1024,
            screen_height: 768,
        }
    }
}

/// Sanitized, self-contained page HTML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlSnapshot {
    pub html: String,
    pub captured_at: DateTime<Utc>,
}

/// Listing row for storage backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub url: Option<String>,
    pub page_title: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub event_count: usize,
    pub has_snapshot: bool,
}

/// A recorded session: metadata, viewport, strictly ordered events and an
/// optional snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SessionRecord")]
pub struct RecordingSession {
    id: Uuid,
    pub metadata: SessionMetadata,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub viewport: ViewportInfo,
    events: Vec<SessionEvent>,
    pub url: Option<String>,
    html: Option<HtmlSnapshot>,
}

/// Unvalidated wire shape.
#[derive(Deserialize)]
struct SessionRecord {
    id: Uuid,
    #[serde(default)]
    metadata: SessionMetadata,
    start_time: DateTime<Utc>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    viewport: ViewportInfo,
    #[serde(default)]
    events: Vec<SessionEvent>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    html: Option<HtmlSnapshot>,
}

impl TryFrom<SessionRecord> for RecordingSession {
    type Error = SessionError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        check_order(&record.events)?;
        Ok(Self {
            id: record.id,
            metadata: record.metadata,
            start_time: record.start_time,
            end_time: record.end_time,
            viewport: record.viewport,
            events: record.events,
            url: record.url,
            html: record.html,
        })
    }
}

fn check_order(events: &[SessionEvent]) -> Result<(), SessionError> {
    for (index, pair) in events.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(SessionError::OutOfOrder {
                index: index + 1,
                previous: pair[0].timestamp,
                next: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

impl RecordingSession {
    pub fn new(
        metadata: SessionMetadata,
        viewport: ViewportInfo,
        url: Option<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata,
            start_time,
            end_time: None,
            viewport,
            events: Vec::new(),
            url,
            html: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }

    /// Append an event; its timestamp must be strictly after the last one.
    pub fn push_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        if let Some(previous) = self.last_timestamp() {
            if event.timestamp <= previous {
                return Err(SessionError::OutOfOrder {
                    index: self.events.len(),
                    previous,
                    next: event.timestamp,
                });
            }
        }
        self.events.push(event);
        Ok(())
    }

    pub fn html(&self) -> Option<&HtmlSnapshot> {
        self.html.as_ref()
    }

    /// Attach the snapshot. A session gets at most one.
    pub fn attach_snapshot(&mut self, snapshot: HtmlSnapshot) -> Result<(), SessionError> {
        if self.html.is_some() {
            return Err(SessionError::SnapshotAlreadyCaptured(self.id));
        }
        self.html = Some(snapshot);
        Ok(())
    }

    /// Detach the snapshot, e.g. to store it next to the event log.
    pub(crate) fn split_snapshot(mut self) -> (Self, Option<HtmlSnapshot>) {
        let html = self.html.take();
        (self, html)
    }

    pub fn finish(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// `end_time - start_time`, once the session is finished.
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Offset of event `index` from the session start, in fractional milliseconds.
    pub fn event_offset_ms(&self, index: usize) -> Option<f64> {
        self.events
            .get(index)
            .map(|e| duration_ms(e.timestamp - self.start_time))
    }

    pub fn event_counts(&self) -> BTreeMap<EventKind, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            user_id: self.metadata.user_id.clone(),
            url: self.url.clone(),
            page_title: self.metadata.page_title.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            event_count: self.events.len(),
            has_snapshot: self.html.is_some(),
        }
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and re-validate event ordering.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Microsecond-precision milliseconds.
pub(crate) fn duration_ms(delta: Duration) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}
