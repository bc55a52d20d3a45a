//! Session player: scheduler, sandbox, simulator and cursor wired together.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ReplayConfig;
use crate::dom::Point;
use crate::session::{EventPayload, RecordingSession, SessionEvent};
use crate::snapshot::ResourceFetcher;

use super::{
    ContentOverrides, ContentSource, CursorOverlay, EventSimulator, PlaybackState, ReplayError,
    ReplayScheduler, ReplayStatus, SandboxRenderer, Simulated,
};

struct Stage {
    sandbox: SandboxRenderer,
    simulator: EventSimulator,
    cursor: CursorOverlay,
    simulate: bool,
    /// Markup and URL of the current content, kept so `stop` can restore it.
    loaded: Option<(String, Option<String>)>,
}

impl Stage {
    fn apply(&mut self, index: usize, event: &SessionEvent) {
        if self.cursor.is_visible() {
            let geometry = self.sandbox.geometry();
            match &event.payload {
                EventPayload::MouseMove { x, y, .. } => {
                    self.cursor.move_to(Point::new(*x, *y), &geometry)
                }
                EventPayload::MouseClick { x, y, .. } => {
                    self.cursor.click(Point::new(*x, *y), index, &geometry)
                }
                _ => {}
            }
        }

        let outcome = match &event.payload {
            EventPayload::Navigation { url, .. } => Simulated::Navigation(url.clone()),
            EventPayload::Resize { width, height } => Simulated::Resize {
                width: *width,
                height: *height,
            },
            _ if self.simulate => self.simulator.apply(&mut self.sandbox, event),
            _ => return,
        };

        match outcome {
            Simulated::Navigation(url) => self.sandbox.acknowledge_navigation(url),
            Simulated::Resize { width, height } => self.sandbox.resize(width, height),
            Simulated::Unresolved => {
                tracing::debug!(index, kind = %event.kind(), "No replay target for event")
            }
            Simulated::Dispatched(_) | Simulated::Scrolled => {}
        }
    }

    fn restore(&mut self) {
        if let Some((html, url)) = &self.loaded {
            self.sandbox.load_html(html, url.as_deref());
        }
        self.simulator.reset();
        self.cursor.reset();
    }
}

/// Plays a [`RecordingSession`] into an isolated [`SandboxRenderer`].
pub struct SessionPlayer {
    scheduler: ReplayScheduler,
    stage: Arc<Mutex<Stage>>,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl SessionPlayer {
    pub fn new(config: ReplayConfig, fetcher: Arc<dyn ResourceFetcher>) -> Result<Self, ReplayError> {
        let scheduler = ReplayScheduler::new(&config)?;
        let stage = Arc::new(Mutex::new(Stage {
            sandbox: SandboxRenderer::new(&config),
            simulator: EventSimulator::new(),
            cursor: CursorOverlay::new(config.show_cursor),
            simulate: config.simulate_real_events,
            loaded: None,
        }));

        let delivery = stage.clone();
        scheduler.on_event(move |index, event| delivery.lock().apply(index, event));

        Ok(Self {
            scheduler,
            stage,
            fetcher,
        })
    }

    /// Load `session` and render its content into the sandbox.
    ///
    /// If the content cannot be rendered the scheduler is suspended, `on_error`
    /// observers are notified and the error is returned.
    pub async fn load(
        &self,
        session: RecordingSession,
        overrides: ContentOverrides,
    ) -> Result<ContentSource, ReplayError> {
        let viewport = session.viewport;
        let recorded_url = session.url.clone();
        let content = self.scheduler.load(Arc::new(session), &overrides);

        let markup = match &content {
            ContentSource::Html(html) => Ok((html.clone(), recorded_url)),
            ContentSource::Url(url) => SandboxRenderer::fetch_page(self.fetcher.as_ref(), url)
                .await
                .map(|html| (html, Some(url.clone()))),
            ContentSource::None => Err(ReplayError::Load(
                "session has neither an HTML snapshot nor a URL".to_string(),
            )),
        };

        match markup {
            Ok((html, url)) => {
                let mut stage = self.stage.lock();
                stage.sandbox.resize(viewport.width, viewport.height);
                stage.loaded = Some((html, url));
                stage.restore();
                Ok(content)
            }
            Err(error) => {
                self.scheduler.fail(error.clone());
                Err(error)
            }
        }
    }

    pub fn play(&self) -> Result<(), ReplayError> {
        self.scheduler.play()
    }

    pub fn pause(&self) -> Result<(), ReplayError> {
        self.scheduler.pause()
    }

    /// Rewind to the first event and restore the loaded content.
    pub fn stop(&self) -> Result<(), ReplayError> {
        self.scheduler.stop()?;
        self.stage.lock().restore();
        Ok(())
    }

    pub fn seek(&self, time_ms: f64) -> Result<(), ReplayError> {
        self.scheduler.seek(time_ms)
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        self.scheduler.set_speed(speed)
    }

    pub fn set_loop(&self, looping: bool) {
        self.scheduler.set_loop(looping);
    }

    pub fn state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    pub fn status(&self) -> ReplayStatus {
        self.scheduler.status()
    }

    /// The underlying scheduler, for registering observers.
    pub fn scheduler(&self) -> &ReplayScheduler {
        &self.scheduler
    }

    pub fn set_container(&self, width: f64, height: f64) {
        self.stage.lock().sandbox.set_container(width, height);
    }

    pub fn cursor(&self) -> CursorOverlay {
        self.stage.lock().cursor.clone()
    }

    /// Run `f` against the sandbox. Do not call player methods from inside `f`.
    pub fn with_sandbox<R>(&self, f: impl FnOnce(&SandboxRenderer) -> R) -> R {
        f(&self.stage.lock().sandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ElementFingerprint;
    use crate::dom::{Document, DomHost};
    use crate::session::{HtmlSnapshot, MouseButton, SessionMetadata, ViewportInfo};
    use crate::snapshot::OfflineFetcher;
    use chrono::{DateTime, Duration, Utc};

    const PAGE: &str = r#"<html><body><form><input id="agree" type="checkbox"></form></body></html>"#;

    fn session(with_snapshot: bool) -> RecordingSession {
        let start = DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000);
        let mut session = RecordingSession::new(
            SessionMetadata::default(),
            ViewportInfo::default(),
            Some("https://example.test/form".to_string()),
            start,
        );
        let doc = Document::parse(PAGE);
        let agree = doc.query_selector("#agree").unwrap().unwrap();
        let target = ElementFingerprint::of(&doc, agree);

        session
            .push_event(SessionEvent::new(
                start + Duration::milliseconds(100),
                EventPayload::MouseClick {
                    x: 12.0,
                    y: 30.0,
                    button: MouseButton::Left,
                    target,
                },
            ))
            .unwrap();
        session
            .push_event(SessionEvent::new(
                start + Duration::milliseconds(200),
                EventPayload::Resize {
                    width: 800,
                    height: 600,
                },
            ))
            .unwrap();
        if with_snapshot {
            session
                .attach_snapshot(HtmlSnapshot {
                    html: PAGE.to_string(),
                    captured_at: start,
                })
                .unwrap();
        }
        session
    }

    fn player() -> SessionPlayer {
        SessionPlayer::new(ReplayConfig::default(), Arc::new(OfflineFetcher)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn replays_into_the_sandbox() {
        let player = player();
        let content = player.load(session(true), ContentOverrides::default()).await.unwrap();
        assert!(matches!(content, ContentSource::Html(_)));

        player.play().unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(player.state(), PlaybackState::Completed);

        player.with_sandbox(|sandbox| {
            let agree = sandbox.query_selector("#agree").unwrap().unwrap();
            assert!(sandbox.document().has_attribute(agree, "checked"));
            assert_eq!(sandbox.viewport().width, 800.0);
        });
        let click = player.cursor().last_click().unwrap();
        assert_eq!(click.event_index, 0);

        // Stopping restores the loaded markup.
        player.stop().unwrap();
        player.with_sandbox(|sandbox| {
            let agree = sandbox.query_selector("#agree").unwrap().unwrap();
            assert!(!sandbox.document().has_attribute(agree, "checked"));
        });
        assert_eq!(player.cursor().position(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn looping_keeps_the_dispatch_log_bounded() {
        let player = SessionPlayer::new(
            ReplayConfig {
                loop_playback: true,
                dispatch_log_limit: 4,
                ..ReplayConfig::default()
            },
            Arc::new(OfflineFetcher),
        )
        .unwrap();
        let delivered = Arc::new(Mutex::new(0usize));
        let counter = delivered.clone();
        player.scheduler().on_event(move |_, _| *counter.lock() += 1);
        player.load(session(true), ContentOverrides::default()).await.unwrap();

        player.play().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1050)).await;
        player.pause().unwrap();

        let delivered = *delivered.lock();
        assert!(delivered >= 10, "only {delivered} deliveries");
        player.with_sandbox(|sandbox| assert_eq!(sandbox.dispatched().len(), 4));
    }

    #[tokio::test]
    async fn load_failure_suspends_and_reports() {
        let player = player();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        player
            .scheduler()
            .on_error(move |e| sink.lock().push(e.to_string()));

        let result = player.load(session(false), ContentOverrides::default()).await;
        assert!(matches!(result, Err(ReplayError::Load(_))));
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn html_override_wins_over_recorded_url() {
        let player = player();
        let overrides = ContentOverrides {
            html: Some("<p id=override></p>".to_string()),
            url: None,
        };
        player.load(session(false), overrides).await.unwrap();
        player.with_sandbox(|sandbox| {
            assert!(sandbox.query_selector("#override").unwrap().is_some());
        });
        assert_eq!(player.state(), PlaybackState::Loaded);
    }
}
