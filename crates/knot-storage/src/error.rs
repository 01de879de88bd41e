//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An object id or type could not be interpreted.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Object content does not follow the git binary layout for its type.
    #[error("parse error: {0}")]
    Parse(String),

    /// Stored bytes disagree with the object id they are filed under.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// zlib failed while storing or loading an object.
    #[error("compression error: {0}")]
    Compression(String),

    /// A branch or ref name is not acceptable.
    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    /// The compare-and-swap on a branch tip lost: the tip is not what the
    /// caller expected.
    #[error("stale ref {name}: expected {expected}, found {actual}")]
    NonFastForward {
        /// Branch name.
        name: String,
        /// Tip the caller expected (hex, zero id for "absent").
        expected: String,
        /// Tip actually found (hex, or "absent").
        actual: String,
    },
}
