//! Branch management.
//!
//! Branch tips only move through compare-and-swap: a push or delete names the
//! tip it expects to replace, and loses if someone else got there first.

use crate::{ObjectId, Result, StorageError};
use knot_types::RepositoryId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix under which branches are advertised.
pub const HEADS_PREFIX: &str = "refs/heads/";

/// A branch of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Owning repository.
    pub repo_id: RepositoryId,
    /// Short name, without `refs/heads/`.
    pub name: String,
    /// Current tip commit.
    pub tip: ObjectId,
    /// Actor of the last successful push.
    pub last_pusher: String,
    /// Unix seconds of the last update.
    pub updated_at: u64,
    /// Commits introduced by the last push.
    pub last_push_commits: usize,
}

impl Branch {
    /// Full ref name.
    pub fn ref_name(&self) -> String {
        format!("{}{}", HEADS_PREFIX, self.name)
    }
}

/// Thread-safe branch table for every repository on the node.
#[derive(Debug, Default)]
pub struct RefManager {
    branches: RwLock<HashMap<RepositoryId, BTreeMap<String, Branch>>>,
}

impl RefManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `name` from `expected_old` to `new`.
    ///
    /// A zero `expected_old` means the branch must not exist yet.
    pub fn push_branch(
        &self,
        repo_id: &RepositoryId,
        name: &str,
        new: ObjectId,
        expected_old: ObjectId,
        commit_count: usize,
        pusher: &str,
    ) -> Result<Branch> {
        validate_branch_name(name)?;
        if new.is_zero() {
            return Err(StorageError::InvalidObject(format!(
                "cannot point {} at the zero id",
                name
            )));
        }

        let mut all = self.branches.write();
        let repo = all.entry(*repo_id).or_default();
        let actual = repo.get(name).map(|b| b.tip);
        let matches = match actual {
            Some(tip) => tip == expected_old,
            None => expected_old.is_zero(),
        };
        if !matches {
            tracing::debug!(
                repo = %repo_id,
                branch = name,
                expected = %expected_old,
                "branch push lost compare-and-swap"
            );
            return Err(stale(name, &expected_old, actual));
        }

        let branch = Branch {
            repo_id: *repo_id,
            name: name.to_string(),
            tip: new,
            last_pusher: pusher.to_string(),
            updated_at: unix_now(),
            last_push_commits: commit_count,
        };
        repo.insert(name.to_string(), branch.clone());
        tracing::info!(
            repo = %repo_id,
            branch = name,
            old = %expected_old,
            new = %new,
            commits = commit_count,
            pusher,
            "branch updated"
        );
        Ok(branch)
    }

    /// Removes `name` if its tip is `expected_old`. A zero `expected_old`
    /// matches any tip. Returns the removed branch.
    pub fn delete_branch(
        &self,
        repo_id: &RepositoryId,
        name: &str,
        expected_old: ObjectId,
    ) -> Result<Branch> {
        validate_branch_name(name)?;

        let mut all = self.branches.write();
        let repo = all.get_mut(repo_id);
        let actual = repo.as_ref().and_then(|r| r.get(name)).map(|b| b.tip);
        match (repo, actual) {
            (Some(repo), Some(tip)) if expected_old.is_zero() || tip == expected_old => {
                let removed = repo.remove(name).ok_or_else(|| stale(name, &expected_old, None))?;
                tracing::info!(repo = %repo_id, branch = name, tip = %tip, "branch deleted");
                Ok(removed)
            }
            (_, actual) => Err(stale(name, &expected_old, actual)),
        }
    }

    /// Looks up one branch.
    pub fn get_branch(&self, repo_id: &RepositoryId, name: &str) -> Option<Branch> {
        self.branches.read().get(repo_id)?.get(name).cloned()
    }

    /// All branches of a repository, sorted by name.
    pub fn get_branches(&self, repo_id: &RepositoryId) -> Vec<Branch> {
        self.branches
            .read()
            .get(repo_id)
            .map(|repo| repo.values().cloned().collect())
            .unwrap_or_default()
    }

    /// `(refs/heads/<name>, tip)` pairs, sorted by ref name.
    pub fn get_refs(&self, repo_id: &RepositoryId) -> Vec<(String, ObjectId)> {
        self.get_branches(repo_id)
            .into_iter()
            .map(|b| (b.ref_name(), b.tip))
            .collect()
    }

    /// Drops every branch of a repository.
    pub fn remove_repository(&self, repo_id: &RepositoryId) -> bool {
        self.branches.write().remove(repo_id).is_some()
    }
}

fn stale(name: &str, expected: &ObjectId, actual: Option<ObjectId>) -> StorageError {
    StorageError::NonFastForward {
        name: name.to_string(),
        expected: expected.to_hex(),
        actual: actual
            .map(|id| id.to_hex())
            .unwrap_or_else(|| "absent".to_string()),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Checks a short branch name against git's ref-format rules.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(StorageError::InvalidRef(format!("{:?}: {}", name, reason)));

    if name.is_empty() {
        return invalid("empty");
    }
    if name.starts_with('/') || name.ends_with('/') {
        return invalid("leading or trailing slash");
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return invalid("forbidden sequence");
    }
    if name.ends_with(".lock") || name.ends_with('.') {
        return invalid("forbidden suffix");
    }
    if name.split('/').any(|part| part.starts_with('.')) {
        return invalid("component starts with a dot");
    }
    if name
        .chars()
        .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return invalid("forbidden character");
    }
    Ok(())
}
