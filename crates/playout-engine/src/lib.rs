//! Playlist supervisor for playout.
//!
//! The supervisor loops over a fixed playlist forever, gating on
//! connectivity, launching one encoder process per source, backing off on
//! failure, and stopping promptly when its handle is told to shut down.

mod error;
mod metrics;
mod orchestrator;
mod state;

pub use error::EngineError;
pub use metrics::MetricsCollector;
pub use orchestrator::{Supervisor, SupervisorConfig, SupervisorHandle};
pub use state::{CurrentChild, ShutdownToken};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
