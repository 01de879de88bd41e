//! Repository types for Knot.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unique identifier for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId([u8; 32]);

impl RepositoryId {
    /// Creates a new repository ID from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Generates a repository ID from the repository name and owner.
    pub fn generate(name: &str, owner: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(owner.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Returns the ID as a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the first 8 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Visibility of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone may fetch.
    #[default]
    Public,
    /// Only the owner and collaborators may fetch.
    Private,
}

/// A repository as known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Unique identifier.
    pub id: RepositoryId,
    /// Human-readable name.
    pub name: String,
    /// Owner identity.
    pub owner: String,
    /// Default branch name, advertised as HEAD.
    pub default_branch: String,
    /// Repository visibility.
    pub visibility: Visibility,
    /// Creation timestamp (unix millis).
    pub created_at: u64,
}

impl Repository {
    /// Creates a new public repository with `main` as its default branch.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let name = name.into();
        let owner = owner.into();
        let id = RepositoryId::generate(&name, &owner);

        Self {
            id,
            name,
            owner,
            default_branch: "main".to_string(),
            visibility: Visibility::Public,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Sets the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Sets the default branch.
    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Returns the full name (owner/name).
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}
