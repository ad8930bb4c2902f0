//! Content-addressed naming of configs and secrets.
//!
//! Swarm configs and secrets are immutable, so a changed file can only be
//! rolled out under a new name. Each file-backed object is named
//! `{stack}-{object}-{hash}`, where `hash` is the first eight hex characters
//! of the MD5 of the file. Unchanged files keep their name across cycles.

use std::path::Path;

use md5::{Digest, Md5};
use serde_yaml::Value;

use super::{object_source, Manifest, ManifestError, ObjectKind, ObjectSource};

/// Swarm object name for a file with the given content.
pub fn rotated_name(stack: &str, object: &str, content: &[u8]) -> String {
    let digest = hex::encode(Md5::digest(content));
    format!("{}-{}-{}", stack, object, &digest[..8])
}

/// Renames every file-backed config and secret of the manifest.
///
/// `objects_dir` is the directory the manifest lives in; object files are
/// resolved against it. Returns the number of renamed objects.
pub fn rotate_configs_and_secrets(
    manifest: &mut Manifest,
    stack: &str,
    objects_dir: &Path,
) -> Result<usize, ManifestError> {
    let mut rotated = 0;
    for kind in [ObjectKind::Config, ObjectKind::Secret] {
        if let Some(Value::Mapping(section)) = manifest.get_mut(kind.section()) {
            for (name, object) in section.iter_mut() {
                let name = name.as_str().ok_or_else(|| ManifestError::InvalidObject {
                    kind,
                    name: format!("{:?}", name),
                    reason: "name must be a string".to_string(),
                })?;
                if rotate_object(kind, stack, name, object, objects_dir)? {
                    rotated += 1;
                }
            }
        }
    }
    Ok(rotated)
}

fn rotate_object(
    kind: ObjectKind,
    stack: &str,
    name: &str,
    object: &mut Value,
    objects_dir: &Path,
) -> Result<bool, ManifestError> {
    let path = match object_source(kind, name, object)? {
        ObjectSource::File(file) => objects_dir.join(file),
        ObjectSource::External | ObjectSource::NonFile => return Ok(false),
    };

    let content = std::fs::read(&path).map_err(|source| ManifestError::ReadObject {
        path: path.clone(),
        source,
    })?;
    let new_name = rotated_name(stack, name, &content);
    log::debug!("Rotating {} {} of stack {} to {}", kind, name, stack, new_name);

    if let Value::Mapping(map) = object {
        map.insert(Value::from("name"), Value::from(new_name));
    }
    Ok(true)
}
