//! Capture: raw signals in, canonical session events out.

pub mod fingerprint;
pub mod pipeline;
pub mod recorder;
pub mod signal;
pub mod throttle;

pub use fingerprint::{css_path, ElementFingerprint, MAX_PATH_DEPTH};
pub use pipeline::{CapturePipeline, MASKED_KEY};
pub use recorder::{PageContext, Recorder, RecorderBuilder, RecorderError};
pub use signal::RawSignal;
pub use throttle::{ThrottleGate, ThrottleSet};
