//! In-place decryption of sops-encrypted secret files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::command::format_command_error;

#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("could not decrypt the file {path}: {message}")]
    Sops { path: PathBuf, message: String },

    #[error("could not run {binary} for {path}: {source}")]
    Spawn {
        binary: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// sops document type, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretFormat {
    Yaml,
    Json,
    Ini,
    Dotenv,
    Binary,
}

impl SecretFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("json") => Self::Json,
            Some("ini") => Self::Ini,
            Some("env") => Self::Dotenv,
            _ => Self::Binary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Ini => "ini",
            Self::Dotenv => "dotenv",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for SecretFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decrypts a secret file, replacing its content with the plaintext.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, path: &Path) -> Result<(), DecryptError>;
}

/// Shells out to the `sops` binary. Keys come from the usual sops
/// environment (`SOPS_AGE_KEY_FILE`, cloud KMS credentials, ...).
#[derive(Debug, Clone)]
pub struct SopsDecryptor {
    binary: String,
}

impl SopsDecryptor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SopsDecryptor {
    fn default() -> Self {
        Self::new("sops")
    }
}

impl SecretDecryptor for SopsDecryptor {
    fn decrypt(&self, path: &Path) -> Result<(), DecryptError> {
        let format = SecretFormat::from_path(path);
        log::debug!("Decrypting {} as {}", path.display(), format);

        let output = Command::new(&self.binary)
            .args(["--decrypt", "--in-place"])
            .args(["--input-type", format.as_str()])
            .args(["--output-type", format.as_str()])
            .arg(path)
            .output()
            .map_err(|source| DecryptError::Spawn {
                binary: self.binary.clone(),
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(DecryptError::Sops {
                path: path.to_path_buf(),
                message: format_command_error(&output),
            });
        }
        Ok(())
    }
}
