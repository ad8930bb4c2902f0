//! Applying a rendered manifest to the swarm.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::command::format_command_error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("could not deploy stack {stack}: {message}")]
    Failed { stack: String, message: String },

    #[error("could not run {binary} to deploy stack {stack} from {path}: {source}")]
    Spawn {
        binary: String,
        stack: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Converges a named stack to the manifest at `manifest`.
pub trait StackDeployer: Send + Sync {
    fn deploy(&self, stack: &str, manifest: &Path) -> Result<(), DeployError>;
}

/// Runs `docker stack deploy` in detached mode, forwarding registry
/// credentials to the swarm agents.
#[derive(Debug, Clone)]
pub struct DockerStackDeployer {
    binary: String,
}

impl DockerStackDeployer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(stack: &str, manifest: &Path) -> Vec<String> {
        vec![
            "stack".to_string(),
            "deploy".to_string(),
            "--detach=true".to_string(),
            "--with-registry-auth".to_string(),
            "-c".to_string(),
            manifest.to_string_lossy().into_owned(),
            stack.to_string(),
        ]
    }
}

impl Default for DockerStackDeployer {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl StackDeployer for DockerStackDeployer {
    fn deploy(&self, stack: &str, manifest: &Path) -> Result<(), DeployError> {
        let output = Command::new(&self.binary)
            .args(Self::args(stack, manifest))
            .output()
            .map_err(|source| DeployError::Spawn {
                binary: self.binary.clone(),
                stack: stack.to_string(),
                path: manifest.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeployError::Failed {
                stack: stack.to_string(),
                message: format_command_error(&output),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("[{}] {}", stack, line.trim());
        }
        Ok(())
    }
}
