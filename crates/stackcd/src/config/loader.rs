use std::path::{Path, PathBuf};

use crate::config::schema::{Config, DEFAULT_CONCURRENCY};
use crate::error::ConfigError;
use crate::manifest::ValuesMap;
use crate::secrets::has_secret_source;

/// Environment variable overriding [`Config::db_path`].
pub const DB_PATH_ENV_VAR: &str = "STACKCD_DB";

/// Loads the controller configuration from a directory.
///
/// `config.yaml` is optional. Repositories and stacks may be declared inline
/// in it; otherwise they are read from `repos.yaml` and `stacks.yaml`.
pub fn load_config<P: AsRef<Path>>(dir: P) -> Result<Config, ConfigError> {
    let dir = dir.as_ref();
    log::info!("Loading configs from {}", dir.display());

    let mut config = match find_config_file(dir, "config") {
        Some(path) => load_config_from_str(&read_file(&path)?, &path)?,
        None => Config::default(),
    };

    if config.repos.is_none() {
        let path = find_config_file(dir, "repos").unwrap_or_else(|| dir.join("repos.yaml"));
        config.repos = Some(parse_yaml(&read_file(&path)?, &path)?.unwrap_or_default());
    }

    if config.stacks.is_none() {
        let path = find_config_file(dir, "stacks").unwrap_or_else(|| dir.join("stacks.yaml"));
        config.stacks = Some(parse_yaml(&read_file(&path)?, &path)?.unwrap_or_default());
    }

    if let Ok(db_path) = std::env::var(DB_PATH_ENV_VAR) {
        if !db_path.is_empty() {
            config.db_path = db_path;
        }
    }

    validate_config(&mut config)?;
    Ok(config)
}

/// Parses a `config.yaml` document. An empty document yields the defaults.
pub fn load_config_from_str(content: &str, origin: &Path) -> Result<Config, ConfigError> {
    Ok(parse_yaml(content, origin)?.unwrap_or_default())
}

/// Checks cross references and fixes up recoverable values.
pub fn validate_config(config: &mut Config) -> Result<(), ConfigError> {
    if config.concurrency == 0 {
        log::warn!(
            "Invalid concurrency value 0, using default: {}",
            DEFAULT_CONCURRENCY
        );
        config.concurrency = DEFAULT_CONCURRENCY;
    }

    if config.update_interval == 0 {
        return Err(ConfigError::Validation {
            message: "update_interval must be at least 1 second".to_string(),
        });
    }

    for (name, repo) in config.repos() {
        if repo.url.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("repo {} has no url", name),
            });
        }
        if !repo.has_credentials() {
            continue;
        }
        if repo.username.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidCredentials {
                repo: name.clone(),
                reason: "you must set username for the repo".to_string(),
            });
        }
        if !has_secret_source(repo.password.as_deref(), repo.password_file.as_deref()) {
            return Err(ConfigError::InvalidCredentials {
                repo: name.clone(),
                reason: "you must set one of password or password_file".to_string(),
            });
        }
    }

    for (name, stack) in config.stacks() {
        let known = config
            .repos
            .as_ref()
            .is_some_and(|repos| repos.contains_key(&stack.repo));
        if !known {
            return Err(ConfigError::UnknownRepo {
                stack: name.clone(),
                repo: stack.repo.clone(),
            });
        }
    }

    Ok(())
}

/// Reads a YAML values map used as template context.
///
/// `source_name` names the owner in error messages ("global", "web stack").
/// An empty file yields an empty map.
pub fn parse_values_file(path: &Path, source_name: &str) -> Result<ValuesMap, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadValues {
        source_name: source_name.to_string(),
        path: path.to_path_buf(),
        source,
    })?;

    if content.trim().is_empty() {
        return Ok(ValuesMap::new());
    }

    serde_yaml::from_str::<Option<ValuesMap>>(&content)
        .map(Option::unwrap_or_default)
        .map_err(|source| ConfigError::ParseValues {
            source_name: source_name.to_string(),
            path: path.to_path_buf(),
            source,
        })
}

fn find_config_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    ["yaml", "yml"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.is_file())
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_yaml<T: serde::de::DeserializeOwned>(
    content: &str,
    origin: &Path,
) -> Result<Option<T>, ConfigError> {
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
        path: origin.to_path_buf(),
        source,
    })
}
