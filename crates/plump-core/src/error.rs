//! Error types for plump-core.

use thiserror::Error;

/// Result type for plump-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in plump-core.
#[derive(Debug, Error)]
pub enum Error {
    /// An endpoint required by the operation has not been wired up.
    #[error("connection error: {0}")]
    Connection(String),

    /// The worker could not satisfy a call (unknown method or handler failure).
    #[error("worker error: {0}")]
    Worker(String),

    /// Encoding or decoding a value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The peer closed its end of the channel.
    #[error("channel closed")]
    Closed,

    /// IO error on the underlying channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An offloaded blocking task failed to complete.
    #[error("task error: {0}")]
    Task(String),

    /// Invalid operation (e.g., registering the reserved shutdown name).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Whether this error means the channel reached end-of-stream.
    ///
    /// Loops treat this as normal termination rather than a failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Classify an IO error, folding the "peer went away" family into [`Error::Closed`].
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => Error::Closed,
            _ => Error::Io(err),
        }
    }
}
