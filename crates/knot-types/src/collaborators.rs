//! Interfaces of the systems a Knot node consults but does not own.
//!
//! Repository ownership, visibility and permissions live in an external
//! registry. Push analytics live in another external service. The node only
//! talks to them through these traits.

use crate::{Repository, RepositoryId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by collaborator implementations.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The backing service could not be reached or answered with an error.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The entity being created already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

/// Resolves `owner/name` pairs to repositories.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    /// Looks up a repository by owner and name. `Ok(None)` means unknown.
    async fn get_repository_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Repository>, CollaboratorError>;
}

/// Decides whether an actor may read from or write to a repository.
///
/// `actor` is `None` for anonymous requests.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Returns true if the actor may fetch from the repository.
    async fn has_read_access(
        &self,
        repo_id: &RepositoryId,
        actor: Option<&str>,
    ) -> Result<bool, CollaboratorError>;

    /// Returns true if the actor may push to the repository.
    async fn has_write_access(
        &self,
        repo_id: &RepositoryId,
        actor: Option<&str>,
    ) -> Result<bool, CollaboratorError>;
}

/// A successful branch update, reported after the push reply is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushContribution {
    /// Repository the push landed in.
    pub repo_id: RepositoryId,
    /// Who pushed.
    pub pusher: String,
    /// Short branch name (without `refs/heads/`).
    pub branch: String,
    /// Number of commits introduced by the push.
    pub commit_count: usize,
    /// First line of the new tip's commit message.
    pub summary: String,
}

/// Receives push events. Calls are fire-and-forget from the node's side.
#[async_trait]
pub trait ContributionTracker: Send + Sync {
    /// Records a successful push.
    async fn record_push(&self, contribution: PushContribution) -> Result<(), CollaboratorError>;
}
