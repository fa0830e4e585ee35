//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur while setting up transport pieces.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid ingest URL template.
    #[error("Invalid ingest URL: {0}")]
    InvalidUrl(String),

    /// Template has no stream key placeholder.
    #[error("Ingest URL template must contain {0}")]
    MissingPlaceholder(&'static str),

    /// Stream key is empty.
    #[error("Stream key is empty")]
    EmptyStreamKey,

    /// Invalid probe URL.
    #[error("Invalid probe URL: {0}")]
    InvalidProbeUrl(String),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
