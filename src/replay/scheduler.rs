//! Speed-scaled playback clock and state machine.
//!
//! At most one delivery is pending at any time. Every transition that could
//! race a pending delivery (`pause`, `stop`, `seek`, `load`) aborts the task
//! and bumps a generation counter; a delivery whose generation no longer
//! matches does nothing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::ReplayConfig;
use crate::session::{RecordingSession, SessionEvent};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplayError {
    #[error("no session loaded")]
    NotLoaded,
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: PlaybackState,
        action: &'static str,
    },
    #[error("speed must be a positive finite number (got {0})")]
    InvalidSpeed(f64),
    #[error("playback needs a tokio runtime")]
    NoRuntime,
    #[error("failed to load replay content: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Paused,
    Completed,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loaded => "loaded",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Caller-supplied content that takes priority over what the session recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentOverrides {
    pub html: Option<String>,
    pub url: Option<String>,
}

/// What the sandbox should render.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSource {
    Html(String),
    Url(String),
    None,
}

impl ContentSource {
    /// Override HTML, then override URL, then recorded HTML, then recorded URL.
    pub fn resolve(session: &RecordingSession, overrides: &ContentOverrides) -> Self {
        if let Some(html) = &overrides.html {
            return ContentSource::Html(html.clone());
        }
        if let Some(url) = &overrides.url {
            return ContentSource::Url(url.clone());
        }
        if let Some(snapshot) = session.html() {
            return ContentSource::Html(snapshot.html.clone());
        }
        match &session.url {
            Some(url) => ContentSource::Url(url.clone()),
            None => ContentSource::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStatus {
    pub state: PlaybackState,
    /// Index of the next event to deliver
    pub cursor: usize,
    pub event_count: usize,
    pub speed: f64,
    pub looping: bool,
    /// Offset of the cursor event from session start
    pub position_ms: f64,
    /// Offset of the last event from session start
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type EventFn = Arc<dyn Fn(usize, &SessionEvent) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;
type StateFn = Arc<dyn Fn(PlaybackState, PlaybackState) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ReplayError) + Send + Sync>;

#[derive(Clone)]
enum Observer {
    Event(EventFn),
    Complete(CompleteFn),
    State(StateFn),
    Error(ErrorFn),
}

enum Notification {
    Event(usize, SessionEvent),
    State(PlaybackState, PlaybackState),
    Complete,
    Error(ReplayError),
}

struct Inner {
    state: PlaybackState,
    session: Option<Arc<RecordingSession>>,
    offsets: Vec<f64>,
    cursor: usize,
    speed: f64,
    looping: bool,
    skip_inactivity: bool,
    max_inactivity_ms: f64,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    content: ContentSource,
}

impl Inner {
    fn cancel_pending(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    fn transition(&mut self, to: PlaybackState, notes: &mut Vec<Notification>) {
        if self.state != to {
            notes.push(Notification::State(self.state, to));
            self.state = to;
        }
    }

    /// Raw gap, clamped when skipping inactivity, divided by the current speed.
    fn scaled_delay(&self, gap_ms: f64) -> Duration {
        let mut gap = gap_ms.max(0.0);
        if self.skip_inactivity {
            gap = gap.min(self.max_inactivity_ms);
        }
        Duration::from_micros((gap * 1000.0 / self.speed).round() as u64)
    }

    /// Highest index whose offset is at or before `time_ms` (0 if none).
    fn index_at(&self, time_ms: f64) -> usize {
        self.offsets
            .partition_point(|offset| *offset <= time_ms)
            .saturating_sub(1)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.get_mut().pending.take() {
            handle.abort();
        }
    }
}

/// Playback state machine. Clones share the same playback.
#[derive(Clone)]
pub struct ReplayScheduler {
    shared: Arc<Shared>,
}

impl ReplayScheduler {
    pub fn new(config: &ReplayConfig) -> Result<Self, ReplayError> {
        validate_speed(config.speed)?;
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: PlaybackState::Idle,
                    session: None,
                    offsets: Vec::new(),
                    cursor: 0,
                    speed: config.speed,
                    looping: config.loop_playback,
                    skip_inactivity: config.skip_inactivity,
                    max_inactivity_ms: config.max_inactivity_delay_ms as f64,
                    generation: 0,
                    pending: None,
                    content: ContentSource::None,
                }),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        })
    }

    // Observers

    pub fn on_event(&self, f: impl Fn(usize, &SessionEvent) + Send + Sync + 'static) -> ObserverId {
        self.add_observer(Observer::Event(Arc::new(f)))
    }

    pub fn on_complete(&self, f: impl Fn() + Send + Sync + 'static) -> ObserverId {
        self.add_observer(Observer::Complete(Arc::new(f)))
    }

    /// Called with `(from, to)` on every state change.
    pub fn on_state_change(
        &self,
        f: impl Fn(PlaybackState, PlaybackState) + Send + Sync + 'static,
    ) -> ObserverId {
        self.add_observer(Observer::State(Arc::new(f)))
    }

    pub fn on_error(&self, f: impl Fn(&ReplayError) + Send + Sync + 'static) -> ObserverId {
        self.add_observer(Observer::Error(Arc::new(f)))
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    fn add_observer(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.lock().push((id, observer));
        id
    }

    /// Deliver notifications in order, outside every lock.
    fn notify(&self, notes: Vec<Notification>) {
        if notes.is_empty() {
            return;
        }
        let observers: Vec<Observer> = self
            .shared
            .observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for note in &notes {
            for observer in &observers {
                match (note, observer) {
                    (Notification::Event(index, event), Observer::Event(f)) => f(*index, event),
                    (Notification::State(from, to), Observer::State(f)) => f(*from, *to),
                    (Notification::Complete, Observer::Complete(f)) => f(),
                    (Notification::Error(e), Observer::Error(f)) => f(e),
                    _ => {}
                }
            }
        }
    }

    // Queries

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().state
    }

    pub fn session(&self) -> Option<Arc<RecordingSession>> {
        self.shared.inner.lock().session.clone()
    }

    pub fn content(&self) -> ContentSource {
        self.shared.inner.lock().content.clone()
    }

    pub fn status(&self) -> ReplayStatus {
        let inner = self.shared.inner.lock();
        let last = inner.offsets.len().saturating_sub(1);
        ReplayStatus {
            state: inner.state,
            cursor: inner.cursor,
            event_count: inner.offsets.len(),
            speed: inner.speed,
            looping: inner.looping,
            position_ms: inner
                .offsets
                .get(inner.cursor.min(last))
                .copied()
                .unwrap_or(0.0),
            duration_ms: inner.offsets.last().copied().unwrap_or(0.0),
        }
    }

    // Transitions

    /// Any state to `Loaded`, cursor at 0. Returns the content to render.
    pub fn load(
        &self,
        session: Arc<RecordingSession>,
        overrides: &ContentOverrides,
    ) -> ContentSource {
        let mut notes = Vec::new();
        let content = {
            let mut inner = self.shared.inner.lock();
            inner.cancel_pending();
            inner.offsets = (0..session.event_count())
                .filter_map(|i| session.event_offset_ms(i))
                .collect();
            inner.cursor = 0;
            inner.content = ContentSource::resolve(&session, overrides);
            inner.session = Some(session);
            inner.transition(PlaybackState::Loaded, &mut notes);
            inner.content.clone()
        };
        tracing::info!(events = self.status().event_count, "Replay loaded");
        self.notify(notes);
        content
    }

    /// Suspend playback (`Paused`) and report `error` to `on_error` observers.
    pub fn fail(&self, error: ReplayError) {
        let mut notes = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            inner.cancel_pending();
            inner.transition(PlaybackState::Paused, &mut notes);
        }
        tracing::warn!(error = %error, "Replay suspended");
        notes.push(Notification::Error(error));
        self.notify(notes);
    }

    /// `Loaded`/`Paused` to `Playing`, delivering from the cursor.
    pub fn play(&self) -> Result<(), ReplayError> {
        if Handle::try_current().is_err() {
            return Err(ReplayError::NoRuntime);
        }

        let mut notes = Vec::new();
        let generation = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                PlaybackState::Idle => return Err(ReplayError::NotLoaded),
                PlaybackState::Completed => {
                    return Err(ReplayError::InvalidTransition {
                        from: PlaybackState::Completed,
                        action: "play",
                    })
                }
                PlaybackState::Playing => return Ok(()),
                PlaybackState::Loaded | PlaybackState::Paused => {}
            }
            inner.cancel_pending();
            inner.transition(PlaybackState::Playing, &mut notes);
            if inner.cursor >= inner.offsets.len() {
                inner.transition(PlaybackState::Completed, &mut notes);
                notes.push(Notification::Complete);
                None
            } else {
                Some(inner.generation)
            }
        };

        self.notify(notes);
        if let Some(generation) = generation {
            self.deliver(generation);
        }
        Ok(())
    }

    /// `Playing` to `Paused`; the cursor stays where it is.
    pub fn pause(&self) -> Result<(), ReplayError> {
        let mut notes = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                PlaybackState::Idle => return Err(ReplayError::NotLoaded),
                PlaybackState::Playing => {
                    inner.cancel_pending();
                    inner.transition(PlaybackState::Paused, &mut notes);
                }
                _ => {}
            }
        }
        self.notify(notes);
        Ok(())
    }

    /// Back to `Loaded` with the cursor at 0.
    pub fn stop(&self) -> Result<(), ReplayError> {
        let mut notes = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == PlaybackState::Idle {
                return Err(ReplayError::NotLoaded);
            }
            inner.cancel_pending();
            inner.cursor = 0;
            inner.transition(PlaybackState::Loaded, &mut notes);
        }
        self.notify(notes);
        Ok(())
    }

    /// Move the cursor to the last event at or before `time_ms`, keeping the
    /// play/pause state. `Completed` becomes `Paused`.
    pub fn seek(&self, time_ms: f64) -> Result<(), ReplayError> {
        let time_ms = if time_ms.is_finite() { time_ms.max(0.0) } else { 0.0 };
        let mut notes = Vec::new();
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state == PlaybackState::Idle {
                return Err(ReplayError::NotLoaded);
            }
            inner.cancel_pending();
            inner.cursor = inner.index_at(time_ms);
            match inner.state {
                PlaybackState::Playing => Some(inner.generation),
                PlaybackState::Completed => {
                    inner.transition(PlaybackState::Paused, &mut notes);
                    None
                }
                _ => None,
            }
        };

        self.notify(notes);
        if let Some(generation) = generation {
            self.deliver(generation);
        }
        Ok(())
    }

    /// Applies to delays scheduled from now on; a pending delay keeps its length.
    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        validate_speed(speed)?;
        self.shared.inner.lock().speed = speed;
        Ok(())
    }

    pub fn set_loop(&self, looping: bool) {
        self.shared.inner.lock().looping = looping;
    }

    pub fn set_skip_inactivity(&self, skip: bool, max_delay_ms: u64) {
        let mut inner = self.shared.inner.lock();
        inner.skip_inactivity = skip;
        inner.max_inactivity_ms = max_delay_ms as f64;
    }

    // Delivery loop

    fn deliver(&self, generation: u64) {
        let delivered = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != PlaybackState::Playing {
                return;
            }
            let index = inner.cursor;
            let event = inner
                .session
                .as_ref()
                .and_then(|s| s.events().get(index))
                .cloned();
            match event {
                Some(event) => {
                    inner.cursor = index + 1;
                    Some((index, event))
                }
                None => None,
            }
        };

        let mut from_index = None;
        if let Some((index, event)) = delivered {
            from_index = Some(index);
            self.notify(vec![Notification::Event(index, event)]);
        }

        let mut notes = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != PlaybackState::Playing {
                return;
            }
            let len = inner.offsets.len();
            if inner.cursor < len {
                let gap = match from_index {
                    Some(from) => inner.offsets[inner.cursor] - inner.offsets[from],
                    None => 0.0,
                };
                let delay = inner.scaled_delay(gap);
                self.schedule(&mut inner, delay, generation, &mut notes);
            } else if inner.looping && len > 0 {
                inner.cursor = 0;
                self.schedule(&mut inner, Duration::ZERO, generation, &mut notes);
            } else {
                inner.pending = None;
                inner.transition(PlaybackState::Completed, &mut notes);
                notes.push(Notification::Complete);
                tracing::info!(events = len, "Replay completed");
            }
        }
        self.notify(notes);
    }

    fn schedule(
        &self,
        inner: &mut Inner,
        delay: Duration,
        generation: u64,
        notes: &mut Vec<Notification>,
    ) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No runtime for scheduled delivery; pausing");
            inner.cancel_pending();
            inner.transition(PlaybackState::Paused, notes);
            return;
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        inner.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                ReplayScheduler { shared }.deliver(generation);
            }
        }));
    }
}

fn validate_speed(speed: f64) -> Result<(), ReplayError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(ReplayError::InvalidSpeed(speed))
    }
}

impl fmt::Debug for ReplayScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayScheduler")
            .field("status", &self.status())
            .finish()
    }
}
