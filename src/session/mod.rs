//! Session Module - Anrufstatus und Owner-Task
//!
//! Dieses Modul verwaltet:
//! - das Session-Datenmodell und die Snapshots für Observer
//! - die State Machine (Idle, Listening, Ringing, Connecting, Active)
//! - den Owner-Task, der alle Eingaben serialisiert
//!

mod handle;
mod machine;
mod notify;
mod state;

pub use handle::{CallSession, EngineEventSink, PlatformPreconditions};
pub use machine::{CallStateMachine, Directive, MediaState, UserAction};
pub use notify::{Advisory, ObserverId, SessionNotification};
pub use state::{PeerId, Phase, Session, SessionSnapshot};
