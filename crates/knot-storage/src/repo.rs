//! Per-repository storage handles.

use crate::refs::RefManager;
use crate::store::{ObjectStore, StoreConfig};
use crate::ObjectId;
use knot_types::{Repository, RepositoryId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything the protocol layer needs for one repository.
#[derive(Debug, Clone)]
pub struct RepoHandle {
    /// Repository being served.
    pub id: RepositoryId,
    /// Branch advertised as HEAD.
    pub default_branch: String,
    /// Object store of this repository only.
    pub objects: Arc<ObjectStore>,
    /// Node-wide branch table.
    pub refs: Arc<RefManager>,
}

impl RepoHandle {
    /// Tip of the default branch, if it exists.
    pub fn head(&self) -> Option<ObjectId> {
        self.refs
            .get_branch(&self.id, &self.default_branch)
            .map(|b| b.tip)
    }

    /// Tips of every branch.
    pub fn branch_tips(&self) -> Vec<ObjectId> {
        self.refs.get_branches(&self.id).into_iter().map(|b| b.tip).collect()
    }
}

/// Object stores of every repository on the node plus the shared branch table.
#[derive(Debug, Default)]
pub struct RepoStore {
    objects: RwLock<HashMap<RepositoryId, Arc<ObjectStore>>>,
    refs: Arc<RefManager>,
    config: StoreConfig,
}

impl RepoStore {
    /// Creates a new empty repository store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose object stores use `config`.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Opens a repository, creating its object store on first use.
    pub fn open(&self, repo: &Repository) -> RepoHandle {
        RepoHandle {
            id: repo.id,
            default_branch: repo.default_branch.clone(),
            objects: self.objects_for(&repo.id),
            refs: Arc::clone(&self.refs),
        }
    }

    fn objects_for(&self, id: &RepositoryId) -> Arc<ObjectStore> {
        if let Some(store) = self.objects.read().get(id) {
            return Arc::clone(store);
        }
        let mut stores = self.objects.write();
        let store = stores.entry(*id).or_insert_with(|| {
            tracing::debug!(repo = %id.short(), "creating object store");
            Arc::new(ObjectStore::with_config(self.config))
        });
        Arc::clone(store)
    }

    /// Shared branch table.
    pub fn refs(&self) -> Arc<RefManager> {
        Arc::clone(&self.refs)
    }

    /// Drops a repository's objects and branches.
    pub fn remove(&self, id: &RepositoryId) -> bool {
        let had_objects = self.objects.write().remove(id).is_some();
        let had_refs = self.refs.remove_repository(id);
        had_objects || had_refs
    }

    /// Number of repositories with an object store.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if no repository has been opened.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
