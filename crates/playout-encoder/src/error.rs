//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur while running the external encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder binary could not be executed.
    #[error("Encoder binary not found or not executable: {0}")]
    BinaryNotFound(String),

    /// Spawning the encoder process failed.
    #[error("Failed to spawn encoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on or polling the process failed.
    #[error("Failed to wait for encoder: {0}")]
    Wait(#[source] std::io::Error),

    /// Sending a termination request failed.
    #[error("Failed to signal encoder: {0}")]
    Signal(String),
}
