//! Stacks and their reconciliation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StackConfig;
use crate::gitops::StackRepo;

pub mod reconciler;
pub mod status;

pub use reconciler::{
    ReconcileError, ReconcileOptions, ReconcileOutcome, ReconcileStep, StackReconciler, StepError,
};
pub use status::{StackStatus, StatusBoard};

/// Which encrypted files a stack decrypts before deploying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretFiles {
    /// Paths relative to the repository root.
    Declared(Vec<PathBuf>),
    /// Every file-backed secret the manifest declares.
    Discover,
}

/// One deployable unit: a manifest on a branch of a repository.
#[derive(Clone)]
pub struct Stack {
    name: String,
    repo: Arc<StackRepo>,
    branch: String,
    compose_file: PathBuf,
    values_file: Option<PathBuf>,
    secret_files: SecretFiles,
    template_folder: Option<PathBuf>,
    environments: Vec<String>,
}

impl Stack {
    pub fn new(
        name: impl Into<String>,
        repo: Arc<StackRepo>,
        branch: impl Into<String>,
        compose_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            repo,
            branch: branch.into(),
            compose_file: compose_file.into(),
            values_file: None,
            secret_files: SecretFiles::Declared(Vec::new()),
            template_folder: None,
            environments: Vec::new(),
        }
    }

    /// Builds a stack from its config entry. Discovery is on when either the
    /// stack or the controller enables it.
    pub fn from_config(
        name: &str,
        config: &StackConfig,
        repo: Arc<StackRepo>,
        global_discovery: bool,
        template_folder: Option<&str>,
    ) -> Self {
        let secret_files = if global_discovery || config.sops_secrets_discovery {
            SecretFiles::Discover
        } else {
            SecretFiles::Declared(config.sops_files.iter().map(PathBuf::from).collect())
        };

        Self::new(name, repo, &config.branch, &config.compose_file)
            .with_values_file(config.values_file.as_deref().filter(|f| !f.is_empty()))
            .with_secret_files(secret_files)
            .with_template_folder(template_folder.filter(|f| !f.is_empty()))
            .with_environments(config.environments.clone())
    }

    pub fn with_values_file(mut self, values_file: Option<impl Into<PathBuf>>) -> Self {
        self.values_file = values_file.map(Into::into);
        self
    }

    pub fn with_secret_files(mut self, secret_files: SecretFiles) -> Self {
        self.secret_files = secret_files;
        self
    }

    pub fn with_template_folder(mut self, folder: Option<impl Into<PathBuf>>) -> Self {
        self.template_folder = folder.map(Into::into);
        self
    }

    pub fn with_environments(mut self, environments: Vec<String>) -> Self {
        self.environments = environments;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repo(&self) -> &Arc<StackRepo> {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Manifest path relative to the repository root.
    pub fn compose_file(&self) -> &Path {
        &self.compose_file
    }

    /// Manifest path inside the working tree.
    pub fn compose_path(&self) -> PathBuf {
        self.repo.path().join(&self.compose_file)
    }

    pub fn values_path(&self) -> Option<PathBuf> {
        self.values_file.as_ref().map(|f| self.repo.path().join(f))
    }

    pub fn secret_files(&self) -> &SecretFiles {
        &self.secret_files
    }

    /// The helper template folder, if configured and readable right now.
    pub fn template_dir(&self) -> Option<PathBuf> {
        let dir = self.repo.path().join(self.template_folder.as_ref()?);
        match std::fs::read_dir(&dir) {
            Ok(_) => Some(dir),
            Err(e) => {
                log::debug!(
                    "Template folder {} of stack {} is not accessible: {}",
                    dir.display(),
                    self.name,
                    e
                );
                None
            }
        }
    }

    pub fn environments(&self) -> &[String] {
        &self.environments
    }

    /// Whether this stack is deployed by a controller running in
    /// `environment`. Stacks without an environment list run everywhere, as
    /// do all stacks when the controller has no environment.
    pub fn runs_in(&self, environment: Option<&str>) -> bool {
        match environment {
            Some(env) if !self.environments.is_empty() => {
                self.environments.iter().any(|e| e == env)
            }
            _ => true,
        }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("name", &self.name)
            .field("repo", &self.repo.name())
            .field("branch", &self.branch)
            .field("compose_file", &self.compose_file)
            .finish()
    }
}
