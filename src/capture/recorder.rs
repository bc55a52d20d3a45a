//! Recording lifecycle.
//!
//! A [`Recorder`] owns the open session, the capture pipeline, the storage
//! handle and every timer. One cancellation token tears all timers down, on
//! `stop` or when the recorder is dropped.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RecorderConfig;
use crate::dom::{Document, DomHost};
use crate::session::{RecordingSession, SessionMetadata, ViewportInfo};
use crate::snapshot::{HttpFetcher, OfflineFetcher, ResourceFetcher, SnapshotPipeline};
use crate::storage::{StorageAdapter, StorageError};
use crate::util::{Clock, SystemClock};

use super::pipeline::CapturePipeline;
use super::signal::RawSignal;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("a recording session is already open")]
    AlreadyRecording,
    #[error("no recording session is open")]
    NotRecording,
    #[error("failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

/// What the host page reports about itself when recording starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContext {
    pub url: Option<String>,
    pub title: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub viewport: ViewportInfo,
}

struct RecorderState {
    session: Option<RecordingSession>,
    last_session: Option<RecordingSession>,
    pipeline: CapturePipeline,
    deadline: Option<DateTime<Utc>>,
    timers: Option<CancellationToken>,
}

struct RecorderShared {
    config: RecorderConfig,
    clock: Arc<dyn Clock>,
    storage: Option<Arc<dyn StorageAdapter>>,
    snapshot: SnapshotPipeline,
    state: Mutex<RecorderState>,
    /// Held across every storage write so a slow autosave cannot land after
    /// the finalized session.
    persisting: tokio::sync::Mutex<()>,
}

pub struct RecorderBuilder {
    config: RecorderConfig,
    clock: Option<Arc<dyn Clock>>,
    storage: Option<Arc<dyn StorageAdapter>>,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
}

impl RecorderBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> Recorder {
        let fetcher = self.fetcher.unwrap_or_else(|| {
            let timeout = StdDuration::from_millis(self.config.fetch_timeout_ms);
            match HttpFetcher::new(timeout) {
                Ok(http) => Arc::new(http) as Arc<dyn ResourceFetcher>,
                Err(e) => {
                    tracing::warn!(error = %e, "HTTP client unavailable; snapshots will not inline resources");
                    Arc::new(OfflineFetcher)
                }
            }
        });

        let shared = RecorderShared {
            snapshot: SnapshotPipeline::new(self.config.clone(), fetcher),
            state: Mutex::new(RecorderState {
                session: None,
                last_session: None,
                pipeline: CapturePipeline::new(&self.config),
                deadline: None,
                timers: None,
            }),
            persisting: tokio::sync::Mutex::new(()),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            storage: self.storage,
            config: self.config,
        };

        Recorder {
            shared: Arc::new(shared),
        }
    }
}

/// Explicit recording context. At most one session is open at a time.
pub struct Recorder {
    shared: Arc<RecorderShared>,
}

impl Recorder {
    pub fn builder(config: RecorderConfig) -> RecorderBuilder {
        RecorderBuilder {
            config,
            clock: None,
            storage: None,
            fetcher: None,
        }
    }

    pub fn new(config: RecorderConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }

    /// Start right away when `auto_start` is configured.
    pub async fn launch(self, page: PageContext, document: &Document) -> Result<Self, RecorderError> {
        if self.shared.config.auto_start {
            self.start(page, document).await?;
        }
        Ok(self)
    }

    /// Open a session, snapshot the page once if configured and arm timers.
    pub async fn start(&self, page: PageContext, document: &Document) -> Result<Uuid, RecorderError> {
        let shared = &self.shared;
        let now = shared.clock.now();
        let metadata = SessionMetadata {
            user_id: shared.config.user_id.clone(),
            user_agent: page.user_agent,
            language: page.language,
            platform: page.platform,
            page_title: page.title,
        };
        let session = RecordingSession::new(metadata, page.viewport, page.url, now);
        let id = session.id();
        let token = CancellationToken::new();

        {
            let mut state = shared.state.lock();
            if state.session.is_some() {
                return Err(RecorderError::AlreadyRecording);
            }
            state.pipeline.reset();
            state.deadline = match shared.config.max_duration_seconds {
                0 => None,
                secs => Some(now + Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))),
            };
            state.timers = Some(token.clone());
            state.session = Some(session);
        }

        tracing::info!(session_id = %id, "Recording started");
        self.spawn_timers(token);

        if shared.config.capture_html {
            let snapshot = shared.snapshot.capture(document, shared.clock.now()).await;
            let mut state = shared.state.lock();
            match state.session.as_mut() {
                Some(session) if session.id() == id => {
                    if let Err(e) = session.attach_snapshot(snapshot) {
                        tracing::warn!(session_id = %id, error = %e, "Snapshot discarded");
                    }
                }
                _ => tracing::debug!(session_id = %id, "Session closed before snapshot finished"),
            }
        }

        Ok(id)
    }

    /// Feed one raw signal. Returns whether an event was recorded; without an
    /// open session this does nothing.
    pub fn handle_signal<H: DomHost + ?Sized>(&self, host: &H, signal: &RawSignal) -> bool {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        if state.deadline.is_some_and(|deadline| now >= deadline) {
            tracing::debug!(session_id = %session.id(), "Signal after max duration dropped");
            return false;
        }

        let Some(mut event) = state.pipeline.process(host, signal, now) else {
            return false;
        };
        if let Some(last) = session.last_timestamp() {
            if event.timestamp <= last {
                event.timestamp = last + Duration::microseconds(1);
            }
        }
        match session.push_event(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unordered event");
                false
            }
        }
    }

    /// Close the session, cancel timers and persist it.
    ///
    /// The finalized session stays available from [`Recorder::last_session`]
    /// even when persisting fails.
    pub async fn stop(&self) -> Result<RecordingSession, RecorderError> {
        self.shared.stop().await
    }

    /// Persist the open session as it stands.
    pub async fn save(&self) -> Result<(), RecorderError> {
        self.shared.save_current().await
    }

    pub fn is_recording(&self) -> bool {
        self.shared.state.lock().session.is_some()
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        self.shared.state.lock().session.clone()
    }

    pub fn last_session(&self) -> Option<RecordingSession> {
        self.shared.state.lock().last_session.clone()
    }

    fn spawn_timers(&self, token: CancellationToken) {
        let config = &self.shared.config;

        if config.save_interval_seconds > 0 {
            let shared = self.shared.clone();
            let token = token.clone();
            let period = StdDuration::from_secs(config.save_interval_seconds);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // Skip the first immediate tick
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => match shared.save_current().await {
                            Ok(()) | Err(RecorderError::NotRecording) => {}
                            Err(e) => tracing::warn!(error = %e, "Autosave failed"),
                        },
                    }
                }
            });
        }

        if config.max_duration_seconds > 0 {
            let shared = self.shared.clone();
            let limit = StdDuration::from_secs(config.max_duration_seconds);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        tracing::info!("Max recording duration reached");
                        if let Err(e) = shared.stop().await {
                            tracing::warn!(error = %e, "Stopping at max duration failed");
                        }
                    }
                }
            });
        }
    }
}

impl RecorderShared {
    async fn stop(&self) -> Result<RecordingSession, RecorderError> {
        let _persisting = self.persisting.lock().await;
        let session = {
            let mut state = self.state.lock();
            let Some(mut session) = state.session.take() else {
                return Err(RecorderError::NotRecording);
            };
            if let Some(token) = state.timers.take() {
                token.cancel();
            }
            state.deadline = None;
            let end = self.clock.now();
            session.finish(end.max(session.last_timestamp().unwrap_or(end)));
            state.last_session = Some(session.clone());
            session
        };

        tracing::info!(
            session_id = %session.id(),
            events = session.event_count(),
            "Recording stopped"
        );
        self.persist(&session).await?;
        Ok(session)
    }

    async fn save_current(&self) -> Result<(), RecorderError> {
        let _persisting = self.persisting.lock().await;
        let session = self
            .state
            .lock()
            .session
            .clone()
            .ok_or(RecorderError::NotRecording)?;
        self.persist(&session).await
    }

    async fn persist(&self, session: &RecordingSession) -> Result<(), RecorderError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        storage.save(session).await.map_err(|e| {
            tracing::warn!(session_id = %session.id(), error = %e, "Failed to save session");
            RecorderError::from(e)
        })
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(token) = self.shared.state.lock().timers.take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("recording", &self.is_recording())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{NodeId, Rect};
    use crate::session::EventKind;
    use crate::session::SessionSummary;
    use crate::storage::MemoryStorage;
    use crate::util::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory storage whose first save takes 100ms.
    #[derive(Default)]
    struct SlowFirstSave {
        inner: MemoryStorage,
        saves: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StorageAdapter for SlowFirstSave {
        async fn save(&self, session: &RecordingSession) -> Result<(), StorageError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
            }
            self.inner.save(session).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<RecordingSession>, StorageError> {
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
            self.inner.list().await
        }

        async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
            self.inner.delete(id).await
        }
    }

    fn page() -> PageContext {
        PageContext {
            url: Some("https://example.test/".to_string()),
            title: Some("Example".to_string()),
            ..PageContext::default()
        }
    }

    fn document() -> Document {
        let mut doc = Document::parse(
            r#"<html><body><input id="q"><div class="secret"><input id="pin"></div></body></html>"#,
        );
        let q = doc.query_selector("#q").unwrap().unwrap();
        doc.set_layout(q, Rect::new(0.0, 0.0, 100.0, 20.0));
        doc
    }

    fn config() -> RecorderConfig {
        RecorderConfig {
            capture_html: false,
            save_interval_seconds: 0,
            max_duration_seconds: 0,
            ..RecorderConfig::default()
        }
    }

    fn node(doc: &Document, selector: &str) -> NodeId {
        doc.query_selector(selector).unwrap().unwrap()
    }

    #[tokio::test]
    async fn signals_without_session_are_ignored() {
        let recorder = Recorder::builder(config()).fetcher(Arc::new(OfflineFetcher)).build();
        let doc = document();
        assert!(!recorder.handle_signal(&doc, &RawSignal::click(1.0, 1.0)));
        assert!(matches!(recorder.stop().await, Err(RecorderError::NotRecording)));
    }

    #[tokio::test]
    async fn only_one_session_at_a_time() {
        let recorder = Recorder::builder(config()).fetcher(Arc::new(OfflineFetcher)).build();
        let doc = document();
        recorder.start(page(), &doc).await.unwrap();
        assert!(matches!(
            recorder.start(page(), &doc).await,
            Err(RecorderError::AlreadyRecording)
        ));
    }

    #[tokio::test]
    async fn equal_clock_readings_are_bumped() {
        let clock = ManualClock::new(Utc::now());
        let recorder = Recorder::builder(config())
            .clock(Arc::new(clock.clone()))
            .fetcher(Arc::new(OfflineFetcher))
            .build();
        let doc = document();
        let q = node(&doc, "#q");
        recorder.start(page(), &doc).await.unwrap();

        assert!(recorder.handle_signal(&doc, &RawSignal::key_down("a", "KeyA", q)));
        assert!(recorder.handle_signal(&doc, &RawSignal::key_up("a", "KeyA", q)));

        let session = recorder.current_session().unwrap();
        let events = session.events();
        assert_eq!(events[1].timestamp - events[0].timestamp, Duration::microseconds(1));
    }

    #[tokio::test]
    async fn stop_persists_and_keeps_last_session() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = ManualClock::new(Utc::now());
        let recorder = Recorder::builder(RecorderConfig {
            user_id: Some("u-1".to_string()),
            exclude_element_selectors: vec![".secret".to_string()],
            ..config()
        })
        .clock(Arc::new(clock.clone()))
        .storage(storage.clone())
        .fetcher(Arc::new(OfflineFetcher))
        .build();
        let doc = document();
        recorder.start(page(), &doc).await.unwrap();

        clock.advance_ms(10);
        recorder.handle_signal(&doc, &RawSignal::click(5.0, 5.0));
        clock.advance_ms(10);
        recorder.handle_signal(&doc, &RawSignal::key_down("1", "Digit1", node(&doc, "#pin")));
        clock.advance_ms(10);

        let session = recorder.stop().await.unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(session.event_count(), 1);
        assert_eq!(session.events()[0].kind(), EventKind::MouseClick);
        assert_eq!(session.metadata.user_id.as_deref(), Some("u-1"));
        assert_eq!(session.duration(), Some(Duration::milliseconds(30)));
        assert_eq!(recorder.last_session().unwrap(), session);
        assert_eq!(storage.get(session.id()).await.unwrap().unwrap(), session);
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_stops_recording() {
        let storage = Arc::new(MemoryStorage::new());
        let recorder = Recorder::builder(RecorderConfig {
            max_duration_seconds: 5,
            ..config()
        })
        .storage(storage.clone())
        .fetcher(Arc::new(OfflineFetcher))
        .build();
        recorder.start(page(), &document()).await.unwrap();

        tokio::time::sleep(StdDuration::from_secs(6)).await;

        assert!(!recorder.is_recording());
        assert!(recorder.last_session().is_some());
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_runs_on_interval() {
        let storage = Arc::new(MemoryStorage::new());
        let recorder = Recorder::builder(RecorderConfig {
            save_interval_seconds: 2,
            ..config()
        })
        .storage(storage.clone())
        .fetcher(Arc::new(OfflineFetcher))
        .build();
        let id = recorder.start(page(), &document()).await.unwrap();
        assert!(storage.is_empty());

        tokio::time::sleep(StdDuration::from_millis(2100)).await;
        let saved = storage.get(id).await.unwrap().unwrap();
        assert!(!saved.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_autosave_never_overwrites_finished_session() {
        let storage = Arc::new(SlowFirstSave::default());
        let recorder = Recorder::builder(RecorderConfig {
            save_interval_seconds: 2,
            ..config()
        })
        .storage(storage.clone())
        .fetcher(Arc::new(OfflineFetcher))
        .build();
        let id = recorder.start(page(), &document()).await.unwrap();

        // The first autosave is now sleeping inside storage.
        tokio::time::sleep(StdDuration::from_millis(2010)).await;
        let stopped = recorder.stop().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(200)).await;

        let stored = storage.get(id).await.unwrap().unwrap();
        assert!(stored.is_finished());
        assert_eq!(stored, stopped);
        assert_eq!(storage.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn launch_respects_auto_start() {
        let doc = document();
        let idle = Recorder::builder(config())
            .fetcher(Arc::new(OfflineFetcher))
            .build()
            .launch(page(), &doc)
            .await
            .unwrap();
        assert!(!idle.is_recording());

        let running = Recorder::builder(RecorderConfig {
            auto_start: true,
            ..config()
        })
        .fetcher(Arc::new(OfflineFetcher))
        .build()
        .launch(page(), &doc)
        .await
        .unwrap();
        assert!(running.is_recording());
    }
}
