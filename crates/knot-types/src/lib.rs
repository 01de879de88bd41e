//! Common types used throughout `knot`.
//!
//! This crate provides repository metadata and the interfaces of the
//! external collaborators (registry, access control, contribution tracking)
//! that a Knot node calls into.

mod collaborators;
mod repository;

pub use collaborators::{
    AccessControl, CollaboratorError, ContributionTracker, PushContribution, RepositoryResolver,
};
pub use repository::{Repository, RepositoryId, Visibility};
