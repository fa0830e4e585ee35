//! Supervisor state machine types.

use std::fmt;

/// The lifecycle state of a supervisor instance.
///
/// Transitions only ever move forward:
/// `Init -> Running -> ShuttingDown -> Terminated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, worker not yet started.
    #[default]
    Init,

    /// Worker is looping over the playlist.
    Running,

    /// Shutdown was requested; the worker is winding down.
    ShuttingDown {
        /// Why the supervisor is stopping.
        reason: StopReason,
    },

    /// Worker has exited and any encoder process has been reaped.
    Terminated,
}

impl SupervisorState {
    /// Returns true if the supervisor has not been started yet.
    pub fn is_init(&self) -> bool {
        matches!(self, Self::Init)
    }

    /// Returns true if the playlist loop is active.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if shutdown is in progress.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::ShuttingDown { .. })
    }

    /// Returns true once the worker has fully stopped.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Running => "Running",
            Self::ShuttingDown { .. } => "ShuttingDown",
            Self::Terminated => "Terminated",
        }
    }
}

/// A process signal that requests shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,

    /// SIGTERM.
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Reason for stopping the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A termination signal was received.
    Signal(ShutdownSignal),

    /// The host asked the supervisor to stop.
    Requested,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::Signal(signal) => format!("Received {signal}"),
            Self::Requested => "Shutdown requested".to_string(),
        }
    }
}
