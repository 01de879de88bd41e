//! Git object storage for Knot.
//!
//! This crate provides content-addressed storage for git objects
//! (blobs, trees, commits, tags), reachability walks over the object graph
//! and compare-and-swap branch management.

mod backend;
mod cache;
mod compression;
mod error;
mod object;
mod parse;
pub mod refs;
mod repo;
mod store;

pub use backend::{MemoryBackend, ObjectBackend};
pub use cache::{CacheStats, ObjectCache};
pub use compression::{
    decode_record, encode_record, CompressionLevel, CompressionStats, CompressionStatsSnapshot,
};
pub use error::StorageError;
pub use object::{GitObject, ObjectId, ObjectType};
pub use parse::{encode_tree, parse_commit, parse_tag, parse_tree, Commit, EntryKind, Tag, TreeEntry};
pub use refs::{validate_branch_name, Branch, RefManager, HEADS_PREFIX};
pub use repo::{RepoHandle, RepoStore};
pub use store::{Closure, ObjectStore, StoreConfig};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
