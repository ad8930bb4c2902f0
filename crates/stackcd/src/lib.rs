pub mod command;
pub mod config;
pub mod controller;
pub mod db;
pub mod decrypt;
pub mod deploy;
pub mod error;
pub mod gitops;
pub mod logging;
pub mod manifest;
pub mod resolver;
pub mod scheduler;
pub mod secrets;
pub mod stack;
pub mod worker;

pub use config::{load_config, Config, RepoConfig, StackConfig};
pub use controller::Controller;
pub use db::{Database, StackMetadata};
pub use decrypt::{SecretDecryptor, SopsDecryptor};
pub use deploy::{DockerStackDeployer, StackDeployer};
pub use error::{ConfigError, Result, StackCdError, WorkerError};
pub use gitops::{GitError, RepoBackend, StackRepo};
pub use logging::{init_logging, LogFormat};
pub use resolver::{ExternalResolver, Resolution, ResolveError, ResolverChain};
pub use scheduler::Scheduler;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use stack::{
    ReconcileError, ReconcileOutcome, ReconcileStep, Stack, StackReconciler, StackStatus,
};
