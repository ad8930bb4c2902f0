//! Repository access for stackcd.
//!
//! Stacks are sourced from git repositories cloned under the configured
//! repos directory. This module provides:
//! - Cloning and fast-forward pulls through the `git` binary
//! - Basic-auth credentials handed to git via a temporary askpass helper
//! - Shared, lockable repository handles for stacks living in one repo

pub mod error;
pub mod git;
pub mod stack_repo;

pub use error::{GitError, Result};
pub use git::{BasicAuth, GitRepository};
pub use stack_repo::{RepoBackend, RepoGuard, StackRepo};
