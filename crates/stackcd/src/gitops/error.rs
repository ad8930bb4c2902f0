//! Repository error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while cloning or updating a stack repository.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git operation failed: {0}")]
    Operation(String),

    #[error("Git network error: {0}")]
    Network(String),

    /// Normalized credential failure. The raw git text ("could not read
    /// Username", "terminal prompts disabled", ...) reads like a missing
    /// credential even when one was supplied.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("Git repository not initialized at '{0}'")]
    NotInitialized(PathBuf),

    #[error("Failed to prepare git credentials: {0}")]
    Credentials(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not clone repo {repo}: {source}")]
    Clone {
        repo: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("could not open existing repo {repo}: {source}")]
    Open {
        repo: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("could not checkout branch {branch} in {repo}: {source}")]
    Checkout {
        repo: String,
        branch: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("could not pull {branch} branch in {repo} repo: {source}")]
    Pull {
        repo: String,
        branch: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("could not get HEAD commit hash of {branch} branch in {repo} repo: {source}")]
    Revision {
        repo: String,
        branch: String,
        #[source]
        source: Box<GitError>,
    },
}

impl GitError {
    /// Returns true if the error is likely transient and the next cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GitError::Network(_) => true,
            GitError::Clone { source, .. }
            | GitError::Open { source, .. }
            | GitError::Checkout { source, .. }
            | GitError::Pull { source, .. }
            | GitError::Revision { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the error (or the error it wraps) is an authentication failure.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            GitError::AuthenticationFailed => true,
            GitError::Clone { source, .. }
            | GitError::Open { source, .. }
            | GitError::Checkout { source, .. }
            | GitError::Pull { source, .. }
            | GitError::Revision { source, .. } => source.is_auth_failure(),
            _ => false,
        }
    }
}

/// Classifies git output into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();

    if lower.contains("authentication failed")
        || lower.contains("authentication required")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("terminal prompts disabled")
        || lower.contains("invalid credentials")
        || lower.contains("invalid username or password")
        || lower.contains("403 forbidden")
        || lower.contains("401 unauthorized")
        || lower.contains("returned error: 401")
        || lower.contains("returned error: 403")
    {
        return GitError::AuthenticationFailed;
    }

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(stderr.trim().to_string());
    }

    GitError::Operation(stderr.trim().to_string())
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, GitError>;
