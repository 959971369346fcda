//! Typed failures surfaced by the cache and decode pipeline.

use thiserror::Error;

/// Probing or decoding a source failed.
///
/// Cloneable so the outcome of one decode can be handed to every attached consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no source registered for {key}")]
    NotFound { key: String },
    #[error("reading {key} failed: {message}")]
    Io { key: String, message: String },
    #[error("could not decode {key}: {message}")]
    Malformed { key: String, message: String },
    #[error("source {key} has degenerate dimensions {width}x{height}")]
    EmptyImage { key: String, width: u32, height: u32 },
    #[error("decoder panicked while processing {key}")]
    Panicked { key: String },
}

impl DecodeError {
    /// Key of the source the failure belongs to.
    pub fn key(&self) -> &str {
        match self {
            DecodeError::NotFound { key }
            | DecodeError::Io { key, .. }
            | DecodeError::Malformed { key, .. }
            | DecodeError::EmptyImage { key, .. }
            | DecodeError::Panicked { key } => key,
        }
    }
}

/// Errors reported synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("requested bounds must be positive, got {width}x{height}")]
    InvalidBounds { width: u32, height: u32 },
    #[error("cache budget must be positive, got {bytes} bytes")]
    InvalidBudget { bytes: usize },
    #[error("failed to start decode worker: {message}")]
    WorkerSpawn { message: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
