use serde_yaml::Value;

use super::{ResolveError, ResolverChain};
use crate::manifest::Manifest;

/// Resolves external references in every service's `environment` block.
///
/// Both compose forms are handled: a map of `KEY: value`, and a list of
/// `KEY=value` strings. Only string values are considered; anything else in
/// the manifest is left alone. Returns the number of substituted values.
pub fn resolve_environment(
    manifest: &mut Manifest,
    chain: &ResolverChain,
) -> Result<usize, ResolveError> {
    if chain.is_empty() {
        return Ok(0);
    }
    let Some(Value::Mapping(services)) = manifest.get_mut("services") else {
        return Ok(0);
    };

    let mut resolved = 0;
    for (name, service) in services.iter_mut() {
        let service_name = name.as_str().unwrap_or_default().to_string();
        let Value::Mapping(service) = service else {
            return Err(ResolveError::InvalidService {
                service: service_name,
            });
        };

        match service.get_mut("environment") {
            Some(Value::Mapping(env)) => {
                for (key, value) in env.iter_mut() {
                    let Value::String(current) = value else {
                        continue;
                    };
                    let variable = key.as_str().unwrap_or_default();
                    let resolution = chain
                        .resolve(current)
                        .map_err(|e| wrap(&service_name, variable, e))?;
                    if resolution.matched {
                        *current = resolution.value;
                        resolved += 1;
                    }
                }
            }
            Some(Value::Sequence(env)) => {
                for item in env.iter_mut() {
                    let Value::String(entry) = item else {
                        continue;
                    };
                    let Some((variable, current)) = entry
                        .split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                    else {
                        continue;
                    };
                    let resolution = chain
                        .resolve(&current)
                        .map_err(|e| wrap(&service_name, &variable, e))?;
                    if resolution.matched {
                        *entry = format!("{}={}", variable, resolution.value);
                        resolved += 1;
                    }
                }
            }
            _ => {}
        }
    }

    if resolved > 0 {
        log::debug!("Resolved {} external environment values", resolved);
    }
    Ok(resolved)
}

fn wrap(service: &str, variable: &str, source: ResolveError) -> ResolveError {
    ResolveError::Environment {
        service: service.to_string(),
        variable: variable.to_string(),
        source: Box::new(source),
    }
}
