//! Credential resolution from multiple sources.
//!
//! Repository passwords and resolver tokens can be supplied in three ways,
//! checked in priority order:
//!
//! 1. **Direct value** in the config file (e.g. `vault_token: s.abc`)
//! 2. **File reference**, the Docker secrets pattern
//!    (e.g. `password_file: /run/secrets/git_password`)
//! 3. **Environment variable** (e.g. `VAULT_TOKEN`)

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first source that is configured.
///
/// Empty strings count as "not configured". File contents and environment
/// values are trimmed, since both usually carry a trailing newline.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileReadError {
                path: expanded,
                source,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing source is `Ok(None)` rather than an
/// error. An unset environment variable also counts as missing here, since
/// the env var is always the implicit last fallback for resolver tokens.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(direct: Option<&str>, file_path: Option<&str>) -> bool {
    direct.is_some_and(|s| !s.is_empty()) || file_path.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the user's home directory. `~user/path` is not
/// supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("STACKCD_TEST_TOKEN_1", "env_value");
        let result =
            resolve_secret(Some("direct_value"), None, Some("STACKCD_TEST_TOKEN_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("STACKCD_TEST_TOKEN_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        std::env::set_var("STACKCD_TEST_TOKEN_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("STACKCD_TEST_TOKEN_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("STACKCD_TEST_TOKEN_2");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback_is_trimmed() {
        std::env::set_var("STACKCD_TEST_TOKEN_3", "env_value\n");
        let result = resolve_secret(None, Some(""), Some("STACKCD_TEST_TOKEN_3")).unwrap();
        assert_eq!(result.expose_secret(), "env_value");
        std::env::remove_var("STACKCD_TEST_TOKEN_3");
    }

    #[test]
    fn test_no_source_error() {
        let result = resolve_secret(None, None, None);
        assert!(matches!(result, Err(SecretError::NoSourceProvided)));
    }

    #[test]
    fn test_file_not_found_error() {
        let result = resolve_secret(None, Some("/nonexistent/path/to/secret"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_file_content_trimmed() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  s.vaulttoken  ").unwrap();

        let result = resolve_secret(None, Some(temp_file.path().to_str().unwrap()), None).unwrap();
        assert_eq!(result.expose_secret(), "s.vaulttoken");
    }

    #[test]
    fn test_has_secret_source() {
        assert!(has_secret_source(Some("value"), None));
        assert!(has_secret_source(None, Some("/path")));
        assert!(!has_secret_source(None, None));
        assert!(!has_secret_source(Some(""), Some("")));
    }

    #[test]
    #[serial]
    fn test_resolve_secret_optional() {
        assert!(resolve_secret_optional(None, None, None).unwrap().is_none());

        std::env::remove_var("STACKCD_TEST_TOKEN_OPT");
        assert!(resolve_secret_optional(None, None, Some("STACKCD_TEST_TOKEN_OPT"))
            .unwrap()
            .is_none());

        std::env::set_var("STACKCD_TEST_TOKEN_OPT", "value");
        let result = resolve_secret_optional(None, None, Some("STACKCD_TEST_TOKEN_OPT")).unwrap();
        assert_eq!(result.unwrap().expose_secret(), "value");
        std::env::remove_var("STACKCD_TEST_TOKEN_OPT");
    }

    #[test]
    fn test_optional_still_reports_unreadable_file() {
        let result = resolve_secret_optional(None, Some("/nonexistent/token"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    #[serial]
    fn test_expand_home() {
        assert_eq!(expand_home("/absolute/path"), "/absolute/path");
        assert_eq!(expand_home("relative/path"), "relative/path");

        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand_home("~/token"), format!("{}/token", home));
            assert_eq!(expand_home("~"), home);
        }
    }
}
