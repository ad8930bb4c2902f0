//! Git operations for stack repositories.

pub mod auth;
pub mod parse;
pub mod repository;

pub use auth::BasicAuth;
pub use repository::GitRepository;
