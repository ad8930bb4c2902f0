//! Git repository operations.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use super::auth::{build_auth_env, BasicAuth};
use super::parse::{count_changed_files, is_up_to_date, parse_revision};
use crate::command::format_command_error;
use crate::gitops::error::{classify_git_error, GitError, Result};
use crate::gitops::stack_repo::RepoBackend;

/// Length of the abbreviated commit hash reported as a revision.
pub const REVISION_LENGTH: usize = 8;

/// A local clone of a remote repository, driven through the `git` binary.
pub struct GitRepository {
    name: String,
    repo_path: PathBuf,
    url: String,
    auth: Option<BasicAuth>,
}

impl GitRepository {
    /// Creates a new git repository handle. Nothing touches the disk until
    /// [`GitRepository::clone_or_open`] is called.
    pub fn new(
        name: impl Into<String>,
        repo_path: impl Into<PathBuf>,
        url: impl Into<String>,
        auth: Option<BasicAuth>,
    ) -> Self {
        Self {
            name: name.into(),
            repo_path: repo_path.into(),
            url: url.into(),
            auth,
        }
    }

    /// Returns the repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Checks if the directory is a git repository.
    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    /// Clones the remote if the local path holds no clone yet, otherwise
    /// opens the existing one.
    pub fn clone_or_open(&self) -> Result<()> {
        if self.is_git_repo() {
            log::info!("Opening existing repo {} at {}", self.name, self.repo_path.display());
            return self.open();
        }

        log::info!("Cloning repo {} into {}", self.name, self.repo_path.display());
        self.clone_remote().map_err(|e| GitError::Clone {
            repo: self.name.clone(),
            source: Box::new(e),
        })
    }

    fn open(&self) -> Result<()> {
        let output = self.run_git(&["rev-parse", "--git-dir"], false)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GitError::Open {
                repo: self.name.clone(),
                source: Box::new(GitError::NotInitialized(self.repo_path.clone())),
            })
        }
    }

    fn clone_remote(&self) -> Result<()> {
        let parent = self
            .repo_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| GitError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let target = self.repo_path.to_str().ok_or_else(|| {
            GitError::Operation(format!(
                "Repository path is not valid UTF-8: {}",
                self.repo_path.display()
            ))
        })?;

        let auth = build_auth_env(self.auth.as_ref())?;
        let mut cmd = Command::new("git");
        cmd.args(["clone", &self.url, target]);
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .map_err(|e| GitError::Operation(e.to_string()))?;
        drop(auth);

        if output.status.success() {
            Ok(())
        } else {
            Err(classify_git_error(&format_command_error(&output)))
        }
    }

    /// Fetches a branch from `origin` without merging.
    pub fn fetch(&self, branch: &str) -> Result<()> {
        self.ensure_repo()?;
        let output = self.run_git(&["fetch", "origin", branch], true)?;
        check(&output)
    }

    /// Force-checks out the remote branch, creating or resetting the local
    /// branch of the same name. Local modifications are discarded.
    pub fn checkout_remote_branch(&self, branch: &str) -> Result<()> {
        self.ensure_repo()?;
        let remote_ref = format!("origin/{}", branch);
        let output = self.run_git(&["checkout", "--force", "-B", branch, &remote_ref], false)?;
        check(&output)
    }

    /// Fast-forwards the local branch to the fetched remote branch.
    ///
    /// Returns the number of changed files (0 when already up to date).
    pub fn merge_ff_only(&self, branch: &str) -> Result<u32> {
        self.ensure_repo()?;
        let remote_ref = format!("origin/{}", branch);
        let output = self.run_git(&["merge", "--ff-only", &remote_ref], false)?;
        check(&output)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if is_up_to_date(&stdout) {
            Ok(0)
        } else {
            Ok(count_changed_files(&stdout))
        }
    }

    /// Gets the abbreviated commit hash of HEAD.
    pub fn head_revision(&self) -> Result<String> {
        let length = format!("--short={}", REVISION_LENGTH);
        let output = self.run_git(&["rev-parse", &length, "HEAD"], false)?;
        check(&output)?;

        parse_revision(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            GitError::Operation("rev-parse returned no commit hash".to_string())
        })
    }

    fn ensure_repo(&self) -> Result<()> {
        if self.is_git_repo() {
            Ok(())
        } else {
            Err(GitError::NotInitialized(self.repo_path.clone()))
        }
    }

    /// Runs a git command in the repository directory. Network operations
    /// pass `with_auth` to receive the askpass environment.
    fn run_git(&self, args: &[&str], with_auth: bool) -> Result<Output> {
        let auth = build_auth_env(if with_auth { self.auth.as_ref() } else { None })?;

        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_path).args(args);
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .map_err(|e| GitError::Operation(e.to_string()))?;
        drop(auth);

        Ok(output)
    }
}

fn check(output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(classify_git_error(&format_command_error(output)))
    }
}

impl RepoBackend for GitRepository {
    fn pull(&self, branch: &str) -> Result<String> {
        let pull_error = |source: GitError| GitError::Pull {
            repo: self.name.clone(),
            branch: branch.to_string(),
            source: Box::new(source),
        };

        self.fetch(branch).map_err(pull_error)?;
        self.checkout_remote_branch(branch)
            .map_err(|source| GitError::Checkout {
                repo: self.name.clone(),
                branch: branch.to_string(),
                source: Box::new(source),
            })?;
        let changed = self.merge_ff_only(branch).map_err(pull_error)?;

        let revision = self.head_revision().map_err(|source| GitError::Revision {
            repo: self.name.clone(),
            branch: branch.to_string(),
            source: Box::new(source),
        })?;

        log::debug!(
            "Pulled {} branch of {} at {} ({} files changed)",
            branch,
            self.name,
            revision,
            changed
        );
        Ok(revision)
    }
}
