//! Git authentication handling.
//!
//! Repositories served over HTTPS are authenticated with a username and
//! password handed to git through a throwaway `GIT_ASKPASS` script.

use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::gitops::error::{GitError, Result};

/// HTTP basic credentials for a repository.
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: SecretString,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Escapes a value for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped so credentials are not left on
/// disk even if the git command fails.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Authentication environment for git commands.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

/// Builds the environment for a git command.
///
/// Terminal prompts are always disabled so a missing credential fails fast
/// instead of blocking a worker.
pub fn build_auth_env(auth: Option<&BasicAuth>) -> Result<AuthEnv> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    let Some(auth) = auth else {
        return Ok(AuthEnv {
            env_vars: env,
            _cleanup: AskpassCleanup::empty(),
        });
    };

    let script = format!(
        "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
        shell_escape(&auth.username),
        shell_escape(auth.password.expose_secret()),
    );

    let askpass_path =
        std::env::temp_dir().join(format!(".stackcd-askpass-{}.sh", uuid::Uuid::new_v4()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)
            .map_err(|source| GitError::Io {
                path: askpass_path.clone(),
                source,
            })?;
        std::io::Write::write_all(&mut file, script.as_bytes()).map_err(|source| {
            GitError::Io {
                path: askpass_path.clone(),
                source,
            }
        })?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &script).map_err(|source| GitError::Io {
            path: askpass_path.clone(),
            source,
        })?;
    }

    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass_path_str = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitError::Credentials("Temp directory path contains non-UTF8 characters".to_string())
        })?
        .to_string();

    env.push(("GIT_ASKPASS".to_string(), askpass_path_str));

    Ok(AuthEnv {
        env_vars: env,
        _cleanup: cleanup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn askpass_path(env: &AuthEnv) -> Option<PathBuf> {
        env.env_vars
            .iter()
            .find(|(k, _)| k == "GIT_ASKPASS")
            .map(|(_, v)| PathBuf::from(v))
    }

    #[test]
    fn test_auth_env_none_disables_prompts() {
        let auth = build_auth_env(None).unwrap();
        assert_eq!(
            auth.env_vars,
            vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
        );
        assert!(askpass_path(&auth).is_none());
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("it's"), "it'\\''s");
        assert_eq!(shell_escape("a'b'c"), "a'\\''b'\\''c");
    }

    #[test]
    fn test_askpass_script_removed_on_drop() {
        let creds = BasicAuth::new("deploy", SecretString::from("hunter2"));
        let auth = build_auth_env(Some(&creds)).unwrap();
        let path = askpass_path(&auth).unwrap();
        assert!(path.exists());

        drop(auth);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_askpass_answers_username_and_password_prompts() {
        use std::process::Command;

        let creds = BasicAuth::new("deploy", SecretString::from("pa'ss word"));
        let auth = build_auth_env(Some(&creds)).unwrap();
        let path = askpass_path(&auth).unwrap();

        let ask = |prompt: &str| {
            let output = Command::new(&path).arg(prompt).output().unwrap();
            String::from_utf8(output.stdout).unwrap().trim_end().to_string()
        };

        assert_eq!(ask("Username for 'https://git.example.com': "), "deploy");
        assert_eq!(
            ask("Password for 'https://deploy@git.example.com': "),
            "pa'ss word"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = BasicAuth::new("deploy", SecretString::from("hunter2"));
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("deploy"));
        assert!(!rendered.contains("hunter2"));
    }
}
