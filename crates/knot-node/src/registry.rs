//! In-memory stand-ins for the external registry and contribution tracker.
//!
//! Production deployments back these traits with the on-chain registry and
//! the analytics service. These versions keep the node runnable on its own.

use async_trait::async_trait;
use knot_types::{
    AccessControl, CollaboratorError, ContributionTracker, PushContribution, Repository,
    RepositoryId, RepositoryResolver, Visibility,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::config::RepositorySeed;

struct Entry {
    repo: Repository,
    collaborators: HashSet<String>,
}

impl Entry {
    fn is_member(&self, actor: Option<&str>) -> bool {
        match actor {
            Some(actor) => actor == self.repo.owner || self.collaborators.contains(actor),
            None => false,
        }
    }
}

/// Repository registry held in memory.
///
/// Public repositories are readable by anyone. Private repositories are
/// readable by their owner and collaborators. Only the owner and
/// collaborators may push.
#[derive(Default)]
pub struct InMemoryRegistry {
    repos: RwLock<HashMap<RepositoryId, Entry>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the configured repositories.
    pub fn from_seeds(seeds: &[RepositorySeed]) -> Result<Self, CollaboratorError> {
        let registry = Self::new();
        for seed in seeds {
            let mut repo = Repository::new(&seed.name, &seed.owner).with_visibility(seed.visibility);
            if let Some(branch) = &seed.default_branch {
                repo = repo.with_default_branch(branch.clone());
            }
            registry.create(repo)?;
            for collaborator in &seed.collaborators {
                registry.add_collaborator(&seed.owner, &seed.name, collaborator);
            }
        }
        Ok(registry)
    }

    /// Registers a repository.
    pub fn create(&self, repo: Repository) -> Result<Repository, CollaboratorError> {
        let mut repos = self.repos.write();
        if repos.contains_key(&repo.id) {
            return Err(CollaboratorError::AlreadyExists(repo.full_name()));
        }
        tracing::info!(repo = %repo.full_name(), id = %repo.id.short(), "repository registered");
        repos.insert(
            repo.id,
            Entry {
                repo: repo.clone(),
                collaborators: HashSet::new(),
            },
        );
        Ok(repo)
    }

    /// Grants `actor` read and write access. Returns false for unknown repositories.
    pub fn add_collaborator(&self, owner: &str, name: &str, actor: &str) -> bool {
        let id = RepositoryId::generate(name, owner);
        match self.repos.write().get_mut(&id) {
            Some(entry) => {
                entry.collaborators.insert(actor.to_string());
                true
            }
            None => false,
        }
    }

    /// Repositories `actor` may read, ordered by owner then name.
    pub fn list_visible(&self, actor: Option<&str>) -> Vec<Repository> {
        let mut repos: Vec<Repository> = self
            .repos
            .read()
            .values()
            .filter(|e| e.repo.visibility == Visibility::Public || e.is_member(actor))
            .map(|e| e.repo.clone())
            .collect();
        repos.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
        repos
    }

    /// Number of registered repositories.
    pub fn len(&self) -> usize {
        self.repos.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.repos.read().is_empty()
    }
}

#[async_trait]
impl RepositoryResolver for InMemoryRegistry {
    async fn get_repository_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Repository>, CollaboratorError> {
        let id = RepositoryId::generate(name, owner);
        Ok(self
            .repos
            .read()
            .get(&id)
            .filter(|e| e.repo.owner == owner && e.repo.name == name)
            .map(|e| e.repo.clone()))
    }
}

#[async_trait]
impl AccessControl for InMemoryRegistry {
    async fn has_read_access(
        &self,
        repo_id: &RepositoryId,
        actor: Option<&str>,
    ) -> Result<bool, CollaboratorError> {
        Ok(self
            .repos
            .read()
            .get(repo_id)
            .is_some_and(|e| e.repo.visibility == Visibility::Public || e.is_member(actor)))
    }

    async fn has_write_access(
        &self,
        repo_id: &RepositoryId,
        actor: Option<&str>,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.repos.read().get(repo_id).is_some_and(|e| e.is_member(actor)))
    }
}

/// Contribution tracker that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingContributionTracker;

#[async_trait]
impl ContributionTracker for TracingContributionTracker {
    async fn record_push(&self, contribution: PushContribution) -> Result<(), CollaboratorError> {
        tracing::info!(
            repo = %contribution.repo_id.short(),
            pusher = %contribution.pusher,
            branch = %contribution.branch,
            commits = contribution.commit_count,
            summary = %contribution.summary,
            "push recorded"
        );
        Ok(())
    }
}
