//! Network-facing pieces of the playout supervisor.
//!
//! This crate owns the RTMP ingest destination (with its secret stream
//! key), the general connectivity probe, and the per-source existence
//! check run before an encoder is launched.

mod endpoint;
mod error;
mod probe;

pub use endpoint::{IngestEndpoint, DEFAULT_INGEST_TEMPLATE, STREAM_KEY_PLACEHOLDER};
pub use error::TransportError;
pub use probe::{ConnectivityProbe, HttpProbe, SourceVerifier, DEFAULT_PROBE_URL};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
