//! # Knot Node
//!
//! A Git smart HTTP server. Standard git clients clone, fetch and push over
//! HTTP; objects and branches live in memory.
//!
//! ## Architecture
//!
//! ```text
//! client ──HTTP──▶ api (axum)
//!                   │  resolve repository, check access
//!                   ▼
//!                 knot-git protocol handler
//!                   │  pkt-lines, packs, negotiation, report-status
//!                   ▼
//!                 knot-storage (object store + branch table)
//! ```
//!
//! Repository metadata and access decisions come from the
//! [`knot_types::RepositoryResolver`] and [`knot_types::AccessControl`]
//! collaborators; [`registry`] provides in-memory versions.
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin knot-node -- --api-addr 127.0.0.1:8080
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Git smart HTTP endpoints and repository management
//! - [`config`] - Node configuration loading
//! - [`observability`] - Structured logging, metrics, and request tracing
//! - [`registry`] - In-memory repository registry and contribution tracker
//!
//! ## Example: Creating an AppState
//!
//! ```rust,no_run
//! use knot_node::api::{create_router, AppState};
//! use knot_node::config::NodeConfig;
//!
//! let state = AppState::from_config(&NodeConfig::default()).unwrap();
//! let app = create_router(state);
//! ```

pub mod api;
pub mod config;
pub mod observability;
pub mod registry;
