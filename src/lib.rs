pub mod capture;
pub mod config;
pub mod dom;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod util;

pub use capture::{
    CapturePipeline, ElementFingerprint, PageContext, RawSignal, Recorder, RecorderBuilder,
    RecorderError,
};
pub use config::{Config, ConfigError, RecorderConfig, ReplayConfig};
pub use dom::{Document, DomHost, InteractiveHost, NodeId, Point, Rect, SyntheticEvent};
pub use replay::{
    ContentOverrides, ContentSource, EventSimulator, PlaybackState, ReplayError,
    ReplayScheduler, SandboxRenderer, SessionPlayer,
};
pub use session::{
    EventKind, EventPayload, HtmlSnapshot, RecordingSession, SessionBundle, SessionEvent,
    SessionMetadata, SessionSummary, ViewportInfo,
};
pub use snapshot::{FetchError, HttpFetcher, ResourceFetcher, SnapshotPipeline};
pub use storage::{MemoryStorage, SqliteStorage, StorageAdapter, StorageError};
pub use util::{Clock, ManualClock, SystemClock};
