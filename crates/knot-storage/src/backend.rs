//! Storage backend traits.
//!
//! A backend only moves opaque, already-compressed object records keyed by
//! object id. Hashing, compression and verification live in
//! [`ObjectStore`](crate::ObjectStore), so a backend can be swapped without
//! touching the integrity rules.

use crate::{ObjectId, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for object storage backends.
pub trait ObjectBackend: Send + Sync {
    /// Stores a record unless one already exists under `id`.
    ///
    /// Returns true if the record was newly written.
    fn write(&self, id: ObjectId, record: Bytes) -> Result<bool>;

    /// Reads a record by id.
    fn read(&self, id: &ObjectId) -> Result<Option<Bytes>>;

    /// Checks if a record exists.
    fn contains(&self, id: &ObjectId) -> Result<bool>;

    /// Returns the number of records.
    fn len(&self) -> Result<usize>;

    /// Returns true if the backend is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Lists all ids.
    fn list(&self) -> Result<Vec<ObjectId>>;
}

impl<T: ObjectBackend> ObjectBackend for Arc<T> {
    fn write(&self, id: ObjectId, record: Bytes) -> Result<bool> {
        (**self).write(id, record)
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Bytes>> {
        (**self).read(id)
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        (**self).contains(id)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn list(&self) -> Result<Vec<ObjectId>> {
        (**self).list()
    }
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<ObjectId, Bytes>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectBackend for MemoryBackend {
    fn write(&self, id: ObjectId, record: Bytes) -> Result<bool> {
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Ok(false);
        }
        records.insert(id, record);
        Ok(true)
    }

    fn read(&self, id: &ObjectId) -> Result<Option<Bytes>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.records.read().contains_key(id))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    fn list(&self) -> Result<Vec<ObjectId>> {
        Ok(self.records.read().keys().copied().collect())
    }
}
