//! Error types for voiceplay
//!
//! Defines the engine error taxonomy using thiserror for clear error
//! propagation. A cancelled stream copy is deliberately not represented
//! here: skip/stop unwinds through the normal completion path.

use thiserror::Error;

/// Main error type for the voiceplay engine
#[derive(Error, Debug)]
pub enum Error {
    /// Dequeue/peek on an empty queue
    #[error("queue is empty")]
    EmptyQueue,

    /// Downloader failed to produce a local file for a track
    #[error("fetch failed for {url}: {message}")]
    Fetch {
        /// Source URL of the track that failed
        url: String,
        /// Downloader-reported cause
        message: String,
    },

    /// Transport connection could not be established
    #[error("transport connection failed: {0}")]
    Connection(String),

    /// The external decode process could not be launched
    #[error("failed to start decode process: {0}")]
    ProcessStart(String),

    /// Resolver collaborator failure
    #[error("resolve failed: {0}")]
    Resolve(String),

    /// Operation not valid in the current player state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the voiceplay Error
pub type Result<T> = std::result::Result<T, Error>;
