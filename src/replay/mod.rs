//! Session replay.
//!
//! [`ReplayScheduler`] owns timing and the playback state machine,
//! [`EventSimulator`] turns each delivered event into synthetic DOM events,
//! and [`SessionPlayer`] wires both to an isolated [`SandboxRenderer`].

mod cursor;
mod player;
mod sandbox;
mod scheduler;
mod simulator;

pub use cursor::{ClickMarker, CursorOverlay};
pub use player::SessionPlayer;
pub use sandbox::{SandboxGeometry, SandboxRenderer};
pub use scheduler::{
    ContentOverrides, ContentSource, ObserverId, PlaybackState, ReplayError, ReplayScheduler,
    ReplayStatus,
};
pub use simulator::{resolve_target, EventSimulator, Simulated, HOVER_ATTR};
