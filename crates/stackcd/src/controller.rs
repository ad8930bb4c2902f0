//! The controller owns every repository, stack and status, and runs
//! reconciliations on behalf of the scheduler and manual triggers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{parse_values_file, Config, RepoConfig};
use crate::db::Database;
use crate::decrypt::SopsDecryptor;
use crate::deploy::DockerStackDeployer;
use crate::error::{ConfigError, Result, StackCdError};
use crate::gitops::{BasicAuth, StackRepo};
use crate::manifest::{RenderOutput, ValuesMap};
use crate::resolver::{
    ConsulResolver, CredentialRenewal, ExternalResolver, RenewableCredential, ResolverChain,
    VaultResolver,
};
use crate::secrets::resolve_secret;
use crate::stack::{
    ReconcileError, ReconcileOptions, ReconcileOutcome, Stack, StackReconciler, StackStatus,
    StatusBoard,
};
use crate::worker::{JobHandler, JobResult, ReconcileJob};

pub struct Controller {
    repos: BTreeMap<String, Arc<StackRepo>>,
    stacks: BTreeMap<String, Arc<Stack>>,
    board: StatusBoard,
    reconciler: StackReconciler,
    renewals: Mutex<Vec<CredentialRenewal>>,
}

impl Controller {
    /// Assembles a controller from explicit parts.
    pub fn new(reconciler: StackReconciler, stacks: Vec<Stack>) -> Self {
        let board = StatusBoard::new();
        let mut repos = BTreeMap::new();
        let mut by_name = BTreeMap::new();

        for stack in stacks {
            board.register(stack.name(), stack.repo().url());
            repos
                .entry(stack.repo().name().to_string())
                .or_insert_with(|| Arc::clone(stack.repo()));
            by_name.insert(stack.name().to_string(), Arc::new(stack));
        }

        Self {
            repos,
            stacks: by_name,
            board,
            reconciler,
            renewals: Mutex::new(Vec::new()),
        }
    }

    /// Builds the controller described by `config`: opens the revision
    /// store, clones every repository, and starts credential renewal for
    /// the configured resolver backends.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Database::open(Path::new(&config.db_path))?;

        let mut resolvers = ResolverChain::new();
        let mut renewable: Vec<Arc<dyn RenewableCredential>> = Vec::new();
        if let Some(vault) = VaultResolver::from_config(config)? {
            let vault = Arc::new(vault);
            resolvers.register(Arc::clone(&vault) as Arc<dyn ExternalResolver>);
            renewable.push(vault);
        }
        if let Some(consul) = ConsulResolver::from_config(config)? {
            let consul = Arc::new(consul);
            resolvers.register(Arc::clone(&consul) as Arc<dyn ExternalResolver>);
            renewable.push(consul);
        }

        let global_values = match config.global_values_file.as_deref().filter(|f| !f.is_empty()) {
            Some(file) => parse_values_file(Path::new(file), "global")?,
            None => ValuesMap::new(),
        };

        let mut repos = BTreeMap::new();
        for (name, repo_config) in config.repos() {
            let path = Path::new(&config.repos_path).join(name);
            let auth = basic_auth(name, repo_config)?;
            let repo = StackRepo::open(name.as_str(), path, repo_config.url.as_str(), auth)?;
            log::info!("Repo {} ready at {}", name, repo.path().display());
            repos.insert(name.clone(), Arc::new(repo));
        }

        let mut stacks = Vec::new();
        for (name, stack_config) in config.stacks() {
            let repo = repos
                .get(&stack_config.repo)
                .ok_or_else(|| ConfigError::UnknownRepo {
                    stack: name.clone(),
                    repo: stack_config.repo.clone(),
                })?;
            let stack = Stack::from_config(
                name,
                stack_config,
                Arc::clone(repo),
                config.sops_secrets_discovery,
                config.template_folder.as_deref(),
            );
            if !stack.runs_in(config.environment.as_deref()) {
                log::debug!(
                    "Skipping stack {}, not deployed to environment {}",
                    name,
                    config.environment.as_deref().unwrap_or_default()
                );
                continue;
            }
            stacks.push(stack);
        }

        let reconciler = StackReconciler::new(
            store,
            Arc::new(resolvers),
            Arc::new(SopsDecryptor::new(config.sops_binary.as_str())),
            Arc::new(DockerStackDeployer::new(config.docker_binary.as_str())),
            ReconcileOptions {
                auto_rotate: config.auto_rotate,
                global_values,
            },
        );

        let mut controller = Self::new(reconciler, stacks);
        // Repos without stacks are still cloned and kept.
        for (name, repo) in repos {
            controller.repos.entry(name).or_insert(repo);
        }
        controller.start_renewals(renewable)?;

        log::info!(
            "Controller ready with {} repos and {} stacks",
            controller.repos.len(),
            controller.stacks.len()
        );
        Ok(controller)
    }

    fn start_renewals(&mut self, credentials: Vec<Arc<dyn RenewableCredential>>) -> Result<()> {
        let renewals = self
            .renewals
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for credential in credentials {
            if let Some(renewal) = CredentialRenewal::start(credential)? {
                renewals.push(renewal);
            }
        }
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Option<Arc<Stack>> {
        self.stacks.get(name).cloned()
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Arc<Stack>> {
        self.stacks.values()
    }

    /// Reconciles one stack and records the result on the status board.
    pub fn reconcile(&self, stack: &Stack) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        log::info!("Updating {} stack", stack.name());
        match self.reconciler.reconcile(stack) {
            Ok(outcome) => {
                self.board.record_success(stack.name(), &outcome);
                log::info!("Done updating {} stack", stack.name());
                Ok(outcome)
            }
            Err(e) => {
                self.board.record_failure(stack.name(), &e);
                if e.is_transient() {
                    log::warn!("{}, retrying next cycle", e);
                } else if e.is_auth_failure() {
                    log::error!("{}, check the credentials of repo {}", e, stack.repo().name());
                } else {
                    log::error!("{}", e);
                }
                Err(e)
            }
        }
    }

    /// Reconciles a stack by name on the calling thread.
    pub fn reconcile_stack(&self, name: &str) -> Result<ReconcileOutcome> {
        let stack = self
            .stack(name)
            .ok_or_else(|| StackCdError::UnknownStack(name.to_string()))?;
        Ok(self.reconcile(&stack)?)
    }

    /// Renders a stack from the current working tree without pulling or
    /// deploying. The status board is left untouched.
    pub fn render_stack(&self, name: &str) -> Result<RenderOutput> {
        let stack = self
            .stack(name)
            .ok_or_else(|| StackCdError::UnknownStack(name.to_string()))?;
        Ok(self.reconciler.render_only(&stack)?)
    }

    pub fn statuses(&self) -> BTreeMap<String, StackStatus> {
        self.board.snapshot()
    }

    pub fn status(&self, name: &str) -> Option<StackStatus> {
        self.board.get(name)
    }

    /// Stops background credential renewal.
    pub fn shutdown(&self) {
        let renewals = std::mem::take(
            &mut *self.renewals.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for mut renewal in renewals {
            log::debug!("Stopping {} credential renewal", renewal.backend());
            renewal.stop();
        }
    }
}

impl JobHandler for Controller {
    fn handle(&self, job: &ReconcileJob) -> JobResult {
        match self.reconcile(&job.stack) {
            Ok(outcome) => JobResult::success(job, &outcome),
            Err(e) => JobResult::failure(job, &e),
        }
    }
}

/// Credentials for a repository. Public repositories get `None`.
fn basic_auth(name: &str, repo: &RepoConfig) -> Result<Option<BasicAuth>> {
    if !repo.has_credentials() {
        return Ok(None);
    }
    let username = repo.username.clone().unwrap_or_default();
    let password = resolve_secret(repo.password.as_deref(), repo.password_file.as_deref(), None)
        .map_err(|e| ConfigError::InvalidCredentials {
            repo: name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Some(BasicAuth::new(username, password)))
}
