//! Compose manifest handling.
//!
//! A manifest travels through the reconciliation pipeline as raw bytes
//! (rendering), then as a YAML mapping (secret resolution, rotation), and
//! finally as serialized bytes again (hashing, writing, deploying).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod discovery;
pub mod filters;
pub mod render;
pub mod rotate;

pub use discovery::discover_secret_files;
pub use render::{merge_values, render_manifest, RenderError, RenderOutput};
pub use rotate::{rotate_configs_and_secrets, rotated_name};

/// Parsed compose manifest.
pub type Manifest = Mapping;

/// Template context exposed as `Values`.
pub type ValuesMap = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("could not read compose file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse stack yaml: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("could not parse stack yaml: top level must be a mapping")]
    NotAMapping,

    #[error("could not serialize stack yaml: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("invalid compose file: {name} {kind} entry {reason}")]
    InvalidObject {
        kind: ObjectKind,
        name: String,
        reason: String,
    },

    #[error("could not read file {path} for rotation: {source}")]
    ReadObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write compose file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level compose sections holding file-backed swarm objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Config,
    Secret,
}

impl ObjectKind {
    /// Name of the top-level section.
    pub fn section(&self) -> &'static str {
        match self {
            ObjectKind::Config => "configs",
            ObjectKind::Secret => "secrets",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Config => write!(f, "config"),
            ObjectKind::Secret => write!(f, "secret"),
        }
    }
}

/// Where a config or secret gets its content from.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ObjectSource<'a> {
    /// Read from a file relative to the manifest.
    File(&'a str),
    /// Managed outside the stack (`external: true`).
    External,
    /// Provided by a plugin driver, an environment variable or inline content.
    NonFile,
}

/// Classifies a single entry of a `configs` or `secrets` section.
pub(crate) fn object_source<'a>(
    kind: ObjectKind,
    name: &str,
    object: &'a Value,
) -> Result<ObjectSource<'a>, ManifestError> {
    let invalid = |reason: &str| ManifestError::InvalidObject {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let map = object.as_mapping().ok_or_else(|| invalid("must be a map"))?;

    match map.get("external") {
        Some(Value::Bool(true)) | Some(Value::Mapping(_)) => return Ok(ObjectSource::External),
        _ => {}
    }

    match map.get("file") {
        Some(Value::String(file)) => Ok(ObjectSource::File(file)),
        Some(_) => Err(invalid("file field must be a string")),
        None if ["driver", "environment", "content"]
            .iter()
            .any(|key| map.contains_key(*key)) =>
        {
            Ok(ObjectSource::NonFile)
        }
        None => Err(invalid("has no file field")),
    }
}

/// Parses manifest bytes. An empty document is an empty manifest.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, ManifestError> {
    match serde_yaml::from_slice::<Value>(bytes).map_err(ManifestError::Parse)? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ManifestError::NotAMapping),
    }
}

/// Serializes a manifest. Equal manifests always produce equal bytes.
pub fn serialize_manifest(manifest: &Manifest) -> Result<Vec<u8>, ManifestError> {
    serde_yaml::to_string(manifest)
        .map(String::into_bytes)
        .map_err(ManifestError::Serialize)
}

/// Hex SHA-256 of serialized manifest bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reads the manifest file of a stack.
pub fn read_manifest(path: &Path) -> Result<Vec<u8>, ManifestError> {
    std::fs::read(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Overwrites the manifest file in place. Truncating the existing file keeps
/// its permissions.
pub fn write_manifest(path: &Path, bytes: &[u8]) -> Result<(), ManifestError> {
    std::fs::write(path, bytes).map_err(|source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    })
}
