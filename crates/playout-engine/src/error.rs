//! Error types for the engine.

use thiserror::Error;

/// Errors surfaced by the supervisor itself.
///
/// Per-item failures never show up here; they are contained in the loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The supervisor was already started.
    #[error("Supervisor already started")]
    AlreadyStarted,

    /// `join` was called before `spawn`.
    #[error("Supervisor not started")]
    NotStarted,

    /// The worker thread could not be created.
    #[error("Failed to spawn worker thread: {0}")]
    SpawnWorker(#[source] std::io::Error),

    /// The worker thread panicked outside per-item handling.
    #[error("Worker thread panicked")]
    WorkerPanicked,
}
