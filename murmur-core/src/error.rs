//! Error types for the murmur-core library

use thiserror::Error;

use crate::engine::EngineError;

/// Main error type for murmur operations
#[derive(Error, Debug)]
pub enum MurmurError {
    /// The RIFF/WAVE container itself is malformed or truncated.
    #[error("Corrupted wave container: {0}")]
    CorruptWave(String),

    /// The container is well formed but carries an encoding we do not decode.
    /// Callers typically respond by transcoding instead of rejecting.
    #[error("Unsupported wave encoding: {0}")]
    UnsupportedWave(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A pass is still running on this processor.
    #[error("A transcription pass is in flight")]
    PassInFlight,

    /// The processor was closed and accepts no further passes.
    #[error("Processor is closed")]
    Closed,

    /// Cooperative cancellation was requested. Expected termination, not a
    /// fault.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for murmur operations
pub type Result<T> = std::result::Result<T, MurmurError>;

impl MurmurError {
    /// Whether this error is the cooperative-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MurmurError::Cancelled)
    }
}

impl PartialEq for MurmurError {
    fn eq(&self, other: &Self) -> bool {
        match self {
            MurmurError::CorruptWave(msg) => {
                matches!(other, MurmurError::CorruptWave(o) if msg == o)
            }
            MurmurError::UnsupportedWave(msg) => {
                matches!(other, MurmurError::UnsupportedWave(o) if msg == o)
            }
            MurmurError::InvalidArgument(msg) => {
                matches!(other, MurmurError::InvalidArgument(o) if msg == o)
            }
            MurmurError::Io(err) => {
                matches!(other, MurmurError::Io(e) if err.to_string() == e.to_string())
            }
            MurmurError::Engine(err) => {
                matches!(other, MurmurError::Engine(e) if err.to_string() == e.to_string())
            }
            MurmurError::Transcode(msg) => {
                matches!(other, MurmurError::Transcode(o) if msg == o)
            }
            MurmurError::Model(msg) => {
                matches!(other, MurmurError::Model(o) if msg == o)
            }
            MurmurError::Configuration(msg) => {
                matches!(other, MurmurError::Configuration(o) if msg == o)
            }
            MurmurError::PassInFlight => matches!(other, MurmurError::PassInFlight),
            MurmurError::Closed => matches!(other, MurmurError::Closed),
            MurmurError::Cancelled => matches!(other, MurmurError::Cancelled),
        }
    }
}
