//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Pack data is malformed: bad magic, version, checksum, truncation,
    /// zlib failure, size mismatch, bad delta or unresolvable base.
    #[error("corrupt pack: {0}")]
    CorruptPack(String),

    /// Pkt-line framing or protocol command that cannot be interpreted.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Object not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] knot_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
