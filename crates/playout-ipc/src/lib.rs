//! Typed messages shared between the playout supervisor and its host.
//!
//! This crate defines the supervisor state machine, the events the
//! supervisor publishes while it works through the playlist, and the
//! configuration values it is constructed with.

mod events;
mod state;
mod types;

pub use events::SupervisorEvent;
pub use state::{ShutdownSignal, StopReason, SupervisorState};
pub use types::{Playlist, PlayoutStats, Timings, DEFAULT_SOURCES};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (Supervisor → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SupervisorEvent>, Receiver<SupervisorEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
