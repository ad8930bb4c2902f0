//! Per-stack reconciliation.
//!
//! One reconciliation pulls the stack's branch, renders its manifest,
//! resolves external environment values, decrypts secret files, rotates
//! config and secret names, and deploys the result if it differs from what
//! was deployed last. The repository stays locked from the pull until the
//! deploy has finished.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info_span;

use super::{SecretFiles, Stack};
use crate::config::parse_values_file;
use crate::db::{revision_repo, Database, DatabaseError, StackMetadata};
use crate::decrypt::{DecryptError, SecretDecryptor};
use crate::deploy::{DeployError, StackDeployer};
use crate::error::ConfigError;
use crate::gitops::GitError;
use crate::manifest::{
    content_hash, discover_secret_files, merge_values, parse_manifest, read_manifest,
    render_manifest, rotate_configs_and_secrets, serialize_manifest, write_manifest, Manifest,
    ManifestError, RenderError, RenderOutput, ValuesMap,
};
use crate::resolver::{resolve_environment, ResolveError, ResolverChain};

/// Pipeline step a reconciliation failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    Pulling,
    Rendering,
    ResolvingSecrets,
    Decrypting,
    Rotating,
    Hashing,
    Deploying,
    Persisting,
}

impl ReconcileStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pulling => "pulling",
            Self::Rendering => "rendering",
            Self::ResolvingSecrets => "resolving secrets",
            Self::Decrypting => "decrypting",
            Self::Rotating => "rotating",
            Self::Hashing => "hashing",
            Self::Deploying => "deploying",
            Self::Persisting => "persisting",
        }
    }
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Values(#[from] ConfigError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// A failed reconciliation of one stack.
#[derive(Error, Debug)]
#[error("{stack} stack failed while {step}: {source}")]
pub struct ReconcileError {
    pub stack: String,
    pub step: ReconcileStep,
    /// Revision pulled before the failure, if the pull got that far.
    pub revision: Option<String>,
    #[source]
    pub source: StepError,
}

impl ReconcileError {
    pub fn new(
        stack: impl Into<String>,
        step: ReconcileStep,
        revision: Option<String>,
        source: StepError,
    ) -> Self {
        Self {
            stack: stack.into(),
            step,
            revision,
            source,
        }
    }

    /// True when the failure came from the network and the next cycle may
    /// succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(&self.source, StepError::Git(e) if e.is_retryable())
    }

    /// True when the repository rejected its credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(&self.source, StepError::Git(e) if e.is_auth_failure())
    }
}

/// A successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub revision: String,
    /// Hash of the manifest now deployed.
    pub hash: String,
    /// False when the manifest was unchanged and the deploy was skipped.
    pub deployed: bool,
    pub templated: bool,
    pub rotated: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub auto_rotate: bool,
    pub global_values: ValuesMap,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            auto_rotate: true,
            global_values: ValuesMap::new(),
        }
    }
}

/// Runs the reconciliation pipeline. Shared by all workers.
pub struct StackReconciler {
    store: Database,
    resolvers: Arc<ResolverChain>,
    decryptor: Arc<dyn SecretDecryptor>,
    deployer: Arc<dyn StackDeployer>,
    options: ReconcileOptions,
}

impl StackReconciler {
    pub fn new(
        store: Database,
        resolvers: Arc<ResolverChain>,
        decryptor: Arc<dyn SecretDecryptor>,
        deployer: Arc<dyn StackDeployer>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            resolvers,
            decryptor,
            deployer,
            options,
        }
    }

    pub fn reconcile(&self, stack: &Stack) -> Result<ReconcileOutcome, ReconcileError> {
        let name = stack.name();
        let _span = info_span!("reconcile",
            stack = %name,
            repo = %stack.repo().name(),
            branch = %stack.branch(),
        )
        .entered();
        let guard = stack.repo().lock();

        let revision = {
            let _step = info_span!("pulling").entered();
            log::debug!("Pulling {} branch for stack {}", stack.branch(), name);
            guard
                .pull(stack.branch())
                .map_err(StepError::from)
                .map_err(failed(name, ReconcileStep::Pulling, None))?
        };
        let rev = Some(revision.as_str());
        log::debug!("Stack {} is at revision {}", name, revision);

        let (mut manifest, templated) = {
            let _step = info_span!("rendering").entered();
            self.render(stack)
                .map_err(failed(name, ReconcileStep::Rendering, rev))?
        };

        {
            let _step = info_span!("resolving_secrets").entered();
            resolve_environment(&mut manifest, &self.resolvers)
                .map_err(StepError::from)
                .map_err(failed(name, ReconcileStep::ResolvingSecrets, rev))?;
        }

        {
            let _step = info_span!("decrypting").entered();
            self.decrypt(stack, &manifest)
                .map_err(failed(name, ReconcileStep::Decrypting, rev))?;
        }

        let rotated = if self.options.auto_rotate {
            let _step = info_span!("rotating").entered();
            let compose_path = stack.compose_path();
            let objects_dir = compose_path.parent().unwrap_or_else(|| stack.repo().path());
            rotate_configs_and_secrets(&mut manifest, name, objects_dir)
                .map_err(StepError::from)
                .map_err(failed(name, ReconcileStep::Rotating, rev))?
        } else {
            0
        };

        let (bytes, hash, previous) = {
            let _step = info_span!("hashing").entered();
            let bytes = serialize_manifest(&manifest)
                .map_err(StepError::from)
                .map_err(failed(name, ReconcileStep::Hashing, rev))?;
            let hash = content_hash(&bytes);
            let previous = revision_repo::find(&self.store, name)
                .map_err(StepError::from)
                .map_err(failed(name, ReconcileStep::Hashing, rev))?
                .unwrap_or_default();
            (bytes, hash, previous)
        };

        if previous.hash == hash {
            log::info!(
                "Stack {} unchanged at revision {} ({}), skipping deploy",
                name,
                revision,
                previous.short_hash()
            );
            let _step = info_span!("persisting").entered();
            self.persist(
                name,
                &StackMetadata {
                    repo_revision: revision.clone(),
                    ..previous
                },
            )
            .map_err(failed(name, ReconcileStep::Persisting, rev))?;
            drop(guard);
            return Ok(ReconcileOutcome {
                revision,
                hash,
                deployed: false,
                templated,
                rotated,
            });
        }

        {
            let _step = info_span!("deploying").entered();
            let compose_path = stack.compose_path();
            let deployed = write_manifest(&compose_path, &bytes)
                .map_err(StepError::from)
                .and_then(|()| {
                    self.deployer
                        .deploy(name, &compose_path)
                        .map_err(StepError::from)
                });

            if let Err(source) = deployed {
                // The pull succeeded, so the repository pointer still moves.
                // The hash stays so the next cycle tries again.
                let advanced = StackMetadata {
                    repo_revision: revision.clone(),
                    ..previous
                };
                if let Err(e) = self.persist(name, &advanced) {
                    log::error!("Could not record revision of stack {}: {}", name, e);
                }
                return Err(failed(name, ReconcileStep::Deploying, rev)(source));
            }
        }

        let metadata = StackMetadata {
            repo_revision: revision.clone(),
            deployed_stack_revision: revision.clone(),
            hash: hash.clone(),
            deployed_at: Some(Utc::now()),
        };
        {
            let _step = info_span!("persisting").entered();
            self.persist(name, &metadata)
                .map_err(failed(name, ReconcileStep::Persisting, rev))?;
        }
        drop(guard);

        log::info!(
            "Deployed stack {} at revision {} ({})",
            name,
            revision,
            metadata.short_hash()
        );
        Ok(ReconcileOutcome {
            revision,
            hash,
            deployed: true,
            templated,
            rotated,
        })
    }

    /// Renders a stack from the working tree as it is, without pulling or
    /// deploying. The repository is locked so a concurrent pull cannot change
    /// the files mid-render.
    pub fn render_only(&self, stack: &Stack) -> Result<RenderOutput, ReconcileError> {
        let _guard = stack.repo().lock();
        self.render_text(stack)
            .and_then(|rendered| {
                parse_manifest(&rendered.bytes)?;
                Ok(rendered)
            })
            .map_err(failed(stack.name(), ReconcileStep::Rendering, None))
    }

    fn render(&self, stack: &Stack) -> Result<(Manifest, bool), StepError> {
        let rendered = self.render_text(stack)?;
        let manifest = parse_manifest(&rendered.bytes)?;
        Ok((manifest, rendered.templated))
    }

    fn render_text(&self, stack: &Stack) -> Result<RenderOutput, StepError> {
        let stack_values = match stack.values_path() {
            Some(path) => parse_values_file(&path, &format!("{} stack", stack.name()))?,
            None => ValuesMap::new(),
        };
        let values = merge_values(&self.options.global_values, &stack_values);

        let raw = read_manifest(&stack.compose_path())?;
        Ok(render_manifest(
            stack.name(),
            &raw,
            &values,
            stack.template_dir().as_deref(),
        )?)
    }

    fn decrypt(&self, stack: &Stack, manifest: &Manifest) -> Result<(), StepError> {
        let files: Vec<PathBuf> = match stack.secret_files() {
            SecretFiles::Declared(files) => files.clone(),
            SecretFiles::Discover => discover_secret_files(manifest, stack.compose_file())?,
        };

        for file in &files {
            let path = stack.repo().path().join(file);
            log::debug!("Decrypting {} for stack {}", file.display(), stack.name());
            self.decryptor.decrypt(&path)?;
        }
        Ok(())
    }

    fn persist(&self, stack: &str, metadata: &StackMetadata) -> Result<(), StepError> {
        revision_repo::upsert(&self.store, stack, metadata)?;
        Ok(())
    }
}

fn failed<'a>(
    stack: &'a str,
    step: ReconcileStep,
    revision: Option<&'a str>,
) -> impl FnOnce(StepError) -> ReconcileError + 'a {
    move |source| ReconcileError::new(stack, step, revision.map(str::to_string), source)
}
