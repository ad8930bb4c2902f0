//! Shared repository handles.
//!
//! Several stacks may live in one repository. Every stack that references a
//! repository holds the same [`StackRepo`], and a reconciliation keeps the
//! repository locked from the pull until its manifest is deployed so no other
//! stack can move the working tree underneath it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::Result;
use super::git::{BasicAuth, GitRepository};

/// Brings a working tree up to date with its remote.
pub trait RepoBackend: Send + Sync {
    /// Updates the working tree to the remote tip of `branch` and returns the
    /// abbreviated revision now checked out.
    fn pull(&self, branch: &str) -> Result<String>;

    /// Called when a [`RepoGuard`] is dropped, while the lock is still held.
    fn released(&self) {}
}

/// A named repository shared by one or more stacks.
pub struct StackRepo {
    name: String,
    path: PathBuf,
    url: String,
    lock: Mutex<()>,
    backend: Box<dyn RepoBackend>,
}

impl StackRepo {
    /// Clones (or opens) the repository at `path` and wraps it in a handle.
    pub fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        url: impl Into<String>,
        auth: Option<BasicAuth>,
    ) -> Result<Self> {
        let name = name.into();
        let path = path.into();
        let url = url.into();

        let git = GitRepository::new(name.clone(), path.clone(), url.clone(), auth);
        git.clone_or_open()?;

        Ok(Self::with_backend(name, path, url, Box::new(git)))
    }

    /// Wraps an already prepared backend.
    pub fn with_backend(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        url: impl Into<String>,
        backend: Box<dyn RepoBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            url: url.into(),
            lock: Mutex::new(()),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local working tree.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Acquires exclusive use of the working tree.
    ///
    /// A worker that panicked while holding the lock leaves no state behind
    /// that the next pull does not overwrite, so poisoning is ignored.
    pub fn lock(&self) -> RepoGuard<'_> {
        RepoGuard {
            _guard: self.lock.lock().unwrap_or_else(PoisonError::into_inner),
            repo: self,
        }
    }
}

impl fmt::Debug for StackRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRepo")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("url", &self.url)
            .finish()
    }
}

/// Proof that the repository lock is held. Pulling is only possible through it.
pub struct RepoGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    repo: &'a StackRepo,
}

impl RepoGuard<'_> {
    pub fn pull(&self, branch: &str) -> Result<String> {
        self.repo.backend.pull(branch)
    }

    pub fn repo(&self) -> &StackRepo {
        self.repo
    }
}

impl Drop for RepoGuard<'_> {
    fn drop(&mut self) {
        self.repo.backend.released();
    }
}
