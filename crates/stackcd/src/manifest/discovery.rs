//! Secret file discovery.

use std::path::{Path, PathBuf};

use super::{object_source, Manifest, ManifestError, ObjectKind, ObjectSource};

/// Lists the files behind the manifest's file-backed secrets, relative to
/// the repository root.
///
/// `compose_file` is the manifest path relative to the repository root;
/// secret files are resolved against its directory. External and non-file
/// secrets are skipped.
pub fn discover_secret_files(
    manifest: &Manifest,
    compose_file: &Path,
) -> Result<Vec<PathBuf>, ManifestError> {
    let Some(secrets) = manifest
        .get(ObjectKind::Secret.section())
        .and_then(|section| section.as_mapping())
    else {
        return Ok(Vec::new());
    };

    let base = compose_file.parent().unwrap_or_else(|| Path::new(""));
    let mut files = Vec::new();

    for (name, secret) in secrets {
        let name = name.as_str().unwrap_or("<non-string key>");
        if let ObjectSource::File(file) = object_source(ObjectKind::Secret, name, secret)? {
            files.push(base.join(file));
        }
    }

    Ok(files)
}
