use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackCdError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository error: {0}")]
    Git(#[from] crate::gitops::GitError),

    #[error("Resolver error: {0}")]
    Resolve(#[from] crate::resolver::ResolveError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Reconcile(#[from] crate::stack::ReconcileError),

    #[error("No such stack: {0}")]
    UnknownStack(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Could not read {source_name} values file '{path}': {source}")]
    ReadValues {
        source_name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse YAML from {source_name} values file '{path}': {source}")]
    ParseValues {
        source_name: String,
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Error initializing {stack} stack, no such repo: {repo}")]
    UnknownRepo { stack: String, repo: String },

    #[error("Invalid credentials for repo {repo}: {reason}")]
    InvalidCredentials { repo: String, reason: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, StackCdError>;
