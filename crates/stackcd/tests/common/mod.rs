//! Shared test utilities for stackcd integration tests.
//!
//! - `Remote`: what the next pull checks out, editable mid-test, plus the
//!   order in which the repository lock was used
//! - `StubBackend`: a repository backend that copies the remote into a temp
//!   working tree instead of talking to git
//! - `RecordingDeployer` / `RecordingDecryptor`: capture side effects
//! - `TestHarness`: a working tree, a shared repository handle and an
//!   in-memory revision store

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use stackcd::db::revision_repo;
use stackcd::decrypt::{DecryptError, SecretDecryptor};
use stackcd::deploy::{DeployError, StackDeployer};
use stackcd::gitops::{GitError, RepoBackend, Result as GitResult, StackRepo};
use stackcd::stack::{ReconcileOptions, Stack, StackReconciler};
use stackcd::{Database, ResolverChain, StackMetadata};

/// Use of the repository lock, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    Pulled,
    Released,
}

#[derive(Default)]
struct RemoteState {
    revision: String,
    files: BTreeMap<String, String>,
    failure: Option<String>,
}

/// Branch tip served to the stub backend.
#[derive(Clone, Default)]
pub struct Remote {
    state: Arc<Mutex<RemoteState>>,
    events: Arc<Mutex<Vec<LockEvent>>>,
}

impl Remote {
    /// Pushes a new commit touching `files`.
    pub fn commit(&self, revision: &str, files: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        state.revision = revision.to_string();
        for (path, content) in files {
            state.files.insert(path.to_string(), content.to_string());
        }
    }

    /// Makes every following pull fail with `message`.
    pub fn break_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().failure = None;
    }

    pub fn lock_events(&self) -> Vec<LockEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Pulls that happened while an earlier pull had not released the lock.
    pub fn overlapping_pulls(&self) -> usize {
        let mut held = false;
        let mut overlaps = 0;
        for event in self.lock_events() {
            match event {
                LockEvent::Pulled if held => overlaps += 1,
                LockEvent::Pulled => held = true,
                LockEvent::Released => held = false,
            }
        }
        overlaps
    }
}

pub struct StubBackend {
    workdir: PathBuf,
    remote: Remote,
}

impl RepoBackend for StubBackend {
    fn pull(&self, _branch: &str) -> GitResult<String> {
        self.remote.events.lock().unwrap().push(LockEvent::Pulled);
        // Widen the window in which an unlocked pull could overlap.
        thread::sleep(Duration::from_millis(5));

        let state = self.remote.state.lock().unwrap();
        if let Some(message) = &state.failure {
            return Err(GitError::Operation(message.clone()));
        }

        for (path, content) in &state.files {
            let target = self.workdir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&target, content).unwrap();
        }
        Ok(state.revision.clone())
    }

    fn released(&self) {
        self.remote.events.lock().unwrap().push(LockEvent::Released);
    }
}

/// Records every deploy together with the manifest it was handed.
#[derive(Default)]
pub struct RecordingDeployer {
    deploys: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingDeployer {
    pub fn failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn deploys(&self) -> Vec<(String, String)> {
        self.deploys.lock().unwrap().clone()
    }

    /// Manifest of the last deploy of `stack`.
    pub fn last_manifest(&self, stack: &str) -> Option<serde_yaml::Value> {
        self.deploys
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(name, _)| name == stack)
            .map(|(_, manifest)| serde_yaml::from_str(manifest).unwrap())
    }
}

impl StackDeployer for RecordingDeployer {
    fn deploy(&self, stack: &str, manifest: &Path) -> Result<(), DeployError> {
        thread::sleep(Duration::from_millis(20));
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeployError::Failed {
                stack: stack.to_string(),
                message: "could not reach swarm manager".to_string(),
            });
        }
        let content = std::fs::read_to_string(manifest).unwrap();
        self.deploys
            .lock()
            .unwrap()
            .push((stack.to_string(), content));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDecryptor {
    pub decrypted: Mutex<Vec<PathBuf>>,
}

impl SecretDecryptor for RecordingDecryptor {
    fn decrypt(&self, path: &Path) -> Result<(), DecryptError> {
        self.decrypted.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Isolated environment for a single test.
pub struct TestHarness {
    temp_dir: TempDir,
    pub remote: Remote,
    pub repo: Arc<StackRepo>,
    pub deployer: Arc<RecordingDeployer>,
    pub decryptor: Arc<RecordingDecryptor>,
    pub store: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let workdir = temp_dir.path().join("infra");
        std::fs::create_dir_all(&workdir).unwrap();

        let remote = Remote::default();
        let repo = Arc::new(StackRepo::with_backend(
            "infra",
            &workdir,
            "https://git.example.com/infra.git",
            Box::new(StubBackend {
                workdir: workdir.clone(),
                remote: remote.clone(),
            }),
        ));
        Self {
            temp_dir,
            remote,
            repo,
            deployer: Arc::new(RecordingDeployer::default()),
            decryptor: Arc::new(RecordingDecryptor::default()),
            store: Database::open_in_memory().unwrap(),
        }
    }

    pub fn workdir(&self) -> &Path {
        self.repo.path()
    }

    pub fn stack(&self, name: &str, compose_file: &str) -> Stack {
        Stack::new(name, Arc::clone(&self.repo), "main", compose_file)
    }

    pub fn reconciler(&self, resolvers: ResolverChain, options: ReconcileOptions) -> StackReconciler {
        StackReconciler::new(
            self.store.clone(),
            Arc::new(resolvers),
            Arc::clone(&self.decryptor) as Arc<dyn SecretDecryptor>,
            Arc::clone(&self.deployer) as Arc<dyn StackDeployer>,
            options,
        )
    }

    pub fn default_reconciler(&self) -> StackReconciler {
        self.reconciler(ResolverChain::new(), ReconcileOptions::default())
    }

    pub fn metadata(&self, stack: &str) -> StackMetadata {
        revision_repo::find(&self.store, stack)
            .unwrap()
            .expect("stack has no recorded metadata")
    }
}
