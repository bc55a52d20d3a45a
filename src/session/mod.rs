//! Session artifact: the serializable record of one capture.

pub mod bundle;
mod model;

pub use bundle::{SessionBundle, SessionBundleMeta, SessionBundleOpen};
pub use model::{
    EventKind, EventPayload, HtmlSnapshot, KeyModifiers, KeyPayload, MouseButton,
    RecordingSession, SessionError, SessionEvent, SessionMetadata, SessionSummary, ViewportInfo,
};
