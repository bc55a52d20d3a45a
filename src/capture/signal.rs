//! Raw input signals as delivered by the host page bridge.

use serde::{Deserialize, Serialize};

use crate::dom::{NodeId, Point};
use crate::session::{EventKind, KeyModifiers, MouseButton};

/// One uninterpreted input signal.
///
/// `target` is the node the platform reported; pointer signals without one
/// are hit-tested at their position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RawSignal {
    PointerMove {
        position: Point,
        #[serde(default)]
        target: Option<NodeId>,
    },
    Click {
        position: Point,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        target: Option<NodeId>,
    },
    /// `target` is the scrolled element, `None` for the window.
    Scroll {
        offset: Point,
        #[serde(default)]
        target: Option<NodeId>,
    },
    KeyDown {
        key: String,
        code: String,
        #[serde(default)]
        modifiers: KeyModifiers,
        #[serde(default)]
        target: Option<NodeId>,
    },
    KeyUp {
        key: String,
        code: String,
        #[serde(default)]
        modifiers: KeyModifiers,
        #[serde(default)]
        target: Option<NodeId>,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Navigation {
        url: String,
        #[serde(default)]
        from: Option<String>,
    },
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl RawSignal {
    pub fn kind(&self) -> EventKind {
        match self {
            RawSignal::PointerMove { .. } => EventKind::MouseMove,
            RawSignal::Click { .. } => EventKind::MouseClick,
            RawSignal::Scroll { .. } => EventKind::MouseScroll,
            RawSignal::KeyDown { .. } => EventKind::KeyDown,
            RawSignal::KeyUp { .. } => EventKind::KeyUp,
            RawSignal::Resize { .. } => EventKind::Resize,
            RawSignal::Navigation { .. } => EventKind::Navigation,
            RawSignal::Custom { .. } => EventKind::Custom,
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        match self {
            RawSignal::PointerMove { target, .. }
            | RawSignal::Click { target, .. }
            | RawSignal::Scroll { target, .. }
            | RawSignal::KeyDown { target, .. }
            | RawSignal::KeyUp { target, .. } => *target,
            RawSignal::Resize { .. } | RawSignal::Navigation { .. } | RawSignal::Custom { .. } => {
                None
            }
        }
    }

    /// Client-coordinate position for pointer signals.
    pub fn position(&self) -> Option<Point> {
        match self {
            RawSignal::PointerMove { position, .. } | RawSignal::Click { position, .. } => {
                Some(*position)
            }
            _ => None,
        }
    }

    pub fn pointer_move(x: f64, y: f64) -> Self {
        RawSignal::PointerMove {
            position: Point::new(x, y),
            target: None,
        }
    }

    pub fn click(x: f64, y: f64) -> Self {
        RawSignal::Click {
            position: Point::new(x, y),
            button: MouseButton::Left,
            target: None,
        }
    }

    pub fn key_down(key: impl Into<String>, code: impl Into<String>, target: NodeId) -> Self {
        RawSignal::KeyDown {
            key: key.into(),
            code: code.into(),
            modifiers: KeyModifiers::default(),
            target: Some(target),
        }
    }

    pub fn key_up(key: impl Into<String>, code: impl Into<String>, target: NodeId) -> Self {
        RawSignal::KeyUp {
            key: key.into(),
            code: code.into(),
            modifiers: KeyModifiers::default(),
            target: Some(target),
        }
    }
}
