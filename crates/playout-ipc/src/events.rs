//! Events published by the supervisor.

use std::time::Duration;

use crate::state::SupervisorState;
use crate::types::PlayoutStats;

/// Events that the supervisor publishes while it runs.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// Supervisor state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SupervisorState>,

        /// Current state.
        current: Box<SupervisorState>,
    },

    /// The connectivity probe failed; the loop will wait before retrying.
    ConnectivityLost {
        /// How long the loop waits before probing again.
        retry_in: Duration,
    },

    /// An encoder is about to be launched for a source.
    ItemStarted {
        pass: u64,
        index: usize,
        source: String,
    },

    /// The encoder exited successfully.
    ItemSucceeded {
        pass: u64,
        index: usize,
        source: String,
    },

    /// The encoder failed to launch or exited with an error.
    ItemFailed {
        pass: u64,
        index: usize,
        source: String,
    },

    /// The source failed verification and was not streamed.
    ItemSkipped {
        pass: u64,
        index: usize,
        source: String,
    },

    /// A full playlist pass finished.
    PassCompleted {
        pass: u64,

        /// Counters at the end of the pass.
        stats: PlayoutStats,
    },
}
