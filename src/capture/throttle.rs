//! Fixed-window throttle gates.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::session::EventKind;

/// Leading-edge gate: the first signal of a window passes, the rest of that
/// window is dropped. A zero window lets everything through.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    window: Duration,
    window_start: Option<DateTime<Utc>>,
}

impl ThrottleGate {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::milliseconds(i64::try_from(window_ms).unwrap_or(i64::MAX / 1000)),
            window_start: None,
        }
    }

    pub fn admit(&mut self, now: DateTime<Utc>) -> bool {
        if self.window <= Duration::zero() {
            return true;
        }
        match self.window_start {
            Some(start) if now >= start && now - start < self.window => false,
            _ => {
                self.window_start = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.window_start = None;
    }
}

/// One gate per throttled event kind.
#[derive(Debug, Clone, Default)]
pub struct ThrottleSet {
    gates: HashMap<EventKind, ThrottleGate>,
}

impl ThrottleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, kind: EventKind, window_ms: u64) -> Self {
        self.gates.insert(kind, ThrottleGate::new(window_ms));
        self
    }

    /// Kinds without a gate always pass.
    pub fn admit(&mut self, kind: EventKind, now: DateTime<Utc>) -> bool {
        self.gates.get_mut(&kind).map_or(true, |gate| gate.admit(now))
    }

    pub fn reset(&mut self) {
        self.gates.values_mut().for_each(ThrottleGate::reset);
    }
}
