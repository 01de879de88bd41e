//! Node configuration.
//!
//! Values come from defaults, then an optional YAML/TOML/JSON file, then
//! `KNOT__*` environment variables (`KNOT__API_ADDR=0.0.0.0:8080`). The
//! binary applies command-line overrides last.

use crate::observability::LogFormat;
use knot_git::{PushOptions, DEFAULT_AGENT, DEFAULT_MAX_PUSH_COMMITS};
use knot_storage::{CompressionLevel, StoreConfig};
use knot_types::Visibility;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Default header carrying the authenticated actor.
pub const DEFAULT_ACTOR_HEADER: &str = "x-knot-actor";

/// Default cap on request bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A repository registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositorySeed {
    /// Owner identity.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Visibility.
    #[serde(default)]
    pub visibility: Visibility,
    /// Default branch, `main` when unset.
    #[serde(default)]
    pub default_branch: Option<String>,
    /// Actors with read and write access besides the owner.
    #[serde(default)]
    pub collaborators: Vec<String>,
}

/// Configuration for a Knot node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub api_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Agent string advertised to git clients.
    pub agent: String,
    /// Request header naming the actor.
    pub actor_header: String,
    /// Largest accepted request body, before and after gzip inflation.
    pub max_body_bytes: usize,
    /// Most commits counted per pushed ref.
    pub max_push_commits: usize,
    /// Decoded objects cached per repository.
    pub object_cache_capacity: usize,
    /// zlib level for stored objects.
    pub compression: CompressionLevel,
    /// Repositories registered at startup.
    pub repositories: Vec<RepositorySeed>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            agent: DEFAULT_AGENT.to_string(),
            actor_header: DEFAULT_ACTOR_HEADER.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_push_commits: DEFAULT_MAX_PUSH_COMMITS,
            object_cache_capacity: store.cache_capacity,
            compression: store.compression,
            repositories: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix("KNOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if self.max_push_commits == 0 {
            return Err(ConfigError::Invalid("max_push_commits must be positive".into()));
        }
        if self.agent.is_empty() || self.agent.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!("agent {:?} must be one word", self.agent)));
        }
        if axum::http::HeaderName::try_from(self.actor_header.as_str()).is_err() {
            return Err(ConfigError::Invalid(format!(
                "actor_header {:?} is not a valid header name",
                self.actor_header
            )));
        }
        Ok(())
    }

    /// Object store settings.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            compression: self.compression,
            cache_capacity: self.object_cache_capacity,
        }
    }

    /// Receive-pack settings.
    pub fn push_options(&self) -> PushOptions {
        PushOptions {
            max_commits: self.max_push_commits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.actor_header, "x-knot-actor");
        assert!(config.agent.starts_with("knot/"));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_addr: "0.0.0.0:9999"
log_format: json
compression: best
repositories:
  - owner: alice
    name: demo
  - owner: alice
    name: private
    visibility: private
    collaborators: [bob]
"#
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.api_addr, "0.0.0.0:9999".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.compression, CompressionLevel::Best);
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[1].visibility, Visibility::Private);
        assert_eq!(config.repositories[1].collaborators, vec!["bob"]);
        assert_eq!(config.actor_header, DEFAULT_ACTOR_HEADER);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "agent = \"knot/custom\"\nobject_cache_capacity = 16").unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.agent, "knot/custom");
        assert_eq!(config.object_cache_capacity, 16);
        assert_eq!(config.store_config().cache_capacity, 16);
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("KNOT__MAX_PUSH_COMMITS", "42");
        let config = NodeConfig::load(None).unwrap();
        std::env::remove_var("KNOT__MAX_PUSH_COMMITS");
        assert_eq!(config.max_push_commits, 42);
        assert_eq!(config.push_options().max_commits, 42);
    }

    #[test]
    fn test_invalid_values() {
        let config = NodeConfig {
            agent: "two words".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = NodeConfig {
            actor_header: "bad header".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
