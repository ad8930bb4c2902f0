//! Manifest templating.
//!
//! Manifests are MiniJinja templates rendered with the merged values map
//! exposed as `Values`. Helper templates (`*.tmpl`) from the stack's
//! template folder are registered under their file names so a manifest can
//! `{% include %}` or `{% import %}` them.

use std::path::Path;

use minijinja::{context, AutoEscape, Environment};
use thiserror::Error;

use super::filters;
use super::ValuesMap;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{stack} stack compose file is not valid UTF-8")]
    Encoding { stack: String },

    #[error("could not parse {stack} stack compose file as a template: {source}")]
    Parse {
        stack: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("error rendering {stack} stack compose template: {source}")]
    Render {
        stack: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Result of rendering a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    /// Whether rendering changed the manifest at all.
    pub templated: bool,
}

/// Merges global and stack values. Stack keys replace global keys wholesale.
pub fn merge_values(global: &ValuesMap, stack: &ValuesMap) -> ValuesMap {
    let mut merged = global.clone();
    merged.extend(stack.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Renders a stack manifest.
///
/// With no values and no template folder the manifest is returned untouched,
/// so plain compose files never go through the template engine.
pub fn render_manifest(
    stack: &str,
    raw: &[u8],
    values: &ValuesMap,
    template_dir: Option<&Path>,
) -> Result<RenderOutput, RenderError> {
    if values.is_empty() && template_dir.is_none() {
        return Ok(RenderOutput {
            bytes: raw.to_vec(),
            templated: false,
        });
    }

    let source = std::str::from_utf8(raw).map_err(|_| RenderError::Encoding {
        stack: stack.to_string(),
    })?;

    let helpers = template_dir.map(load_helpers).unwrap_or_default();
    let mut env = match build_environment(&helpers) {
        Ok(env) => env,
        Err(e) => {
            log::warn!(
                "Could not parse templates of stack {}, trying to generate stack without them: {}",
                stack,
                e
            );
            new_environment()
        }
    };

    env.add_template_owned(stack.to_string(), source.to_string())
        .map_err(|source| RenderError::Parse {
            stack: stack.to_string(),
            source,
        })?;

    let rendered = env
        .get_template(stack)
        .and_then(|template| template.render(context! { Values => values }))
        .map_err(|source| RenderError::Render {
            stack: stack.to_string(),
            source,
        })?;

    let templated = rendered.as_bytes() != raw;
    Ok(RenderOutput {
        bytes: rendered.into_bytes(),
        templated,
    })
}

fn new_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    filters::register(&mut env);
    env
}

fn build_environment(helpers: &[(String, String)]) -> Result<Environment<'static>, minijinja::Error> {
    let mut env = new_environment();
    for (name, source) in helpers {
        env.add_template_owned(name.clone(), source.clone())?;
    }
    Ok(env)
}

/// Reads `*.tmpl` files from the template folder as `(file name, source)`.
/// Unreadable files are skipped with a warning.
fn load_helpers(dir: &Path) -> Vec<(String, String)> {
    let pattern = dir.join("*.tmpl");
    let paths = match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths,
        Err(e) => {
            log::warn!("Invalid template folder pattern {}: {}", pattern.display(), e);
            return Vec::new();
        }
    };

    let mut helpers = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Could not read template folder entry: {}", e);
                continue;
            }
        };
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        match std::fs::read_to_string(&path) {
            Ok(source) => helpers.push((name, source)),
            Err(e) => log::warn!("Could not read template {}: {}", path.display(), e),
        }
    }

    if helpers.is_empty() {
        log::debug!("Template folder {} is empty", dir.display());
    }
    helpers
}
