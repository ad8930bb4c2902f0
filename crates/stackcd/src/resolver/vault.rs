//! HashiCorp Vault backend.
//!
//! References look like `vault:<path>#<key>`, e.g.
//! `vault:secret/data/web#db_password`. Both KV v1 and KV v2 mounts work:
//! a v2 payload nests the secret under a second `data` object.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::renewal::RenewableCredential;
use super::{split_key, stringify, ExternalResolver, ResolveError};
use crate::config::Config;
use crate::secrets::resolve_secret_optional;

const BACKEND: &str = "Vault";
const TOKEN_ENV_VAR: &str = "VAULT_TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Deserialize)]
struct SecretResponse {
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RenewResponse {
    auth: Option<RenewAuth>,
}

#[derive(Debug, Deserialize)]
struct RenewAuth {
    client_token: Option<String>,
    lease_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Read failure, split by whether a token renewal could help.
#[derive(Debug)]
pub(crate) enum ReadFailure {
    Unauthorized(String),
    Other(String),
}

impl ReadFailure {
    fn message(&self) -> &str {
        match self {
            Self::Unauthorized(m) | Self::Other(m) => m,
        }
    }
}

/// Whether an error message looks like an expired or revoked credential.
pub(crate) fn is_auth_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["permission denied", "token", "unauthorized", "403"]
        .iter()
        .any(|pattern| lower.contains(pattern))
}

pub struct VaultResolver {
    http: Client,
    address: String,
    namespace: Option<String>,
    token: RwLock<SecretString>,
    renew_increment: Duration,
}

impl VaultResolver {
    /// Creates a client for `address`. `renew_days` is the token lifetime
    /// requested on each renewal.
    pub fn new(
        address: &str,
        token: SecretString,
        namespace: Option<String>,
        renew_days: u64,
    ) -> Result<Self, ResolveError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ResolveError::Configuration {
                backend: BACKEND,
                message: format!("could not create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            address: address.trim_end_matches('/').to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            token: RwLock::new(token),
            renew_increment: Duration::from_secs(renew_days.max(1) * SECONDS_PER_DAY),
        })
    }

    /// Builds the resolver from controller config. `Ok(None)` when no
    /// address is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, ResolveError> {
        let Some(address) = config.vault_address.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };

        let token = resolve_secret_optional(
            config.vault_token.as_deref(),
            config.vault_token_file.as_deref(),
            Some(TOKEN_ENV_VAR),
        )
        .map_err(|e| ResolveError::Configuration {
            backend: BACKEND,
            message: e.to_string(),
        })?
        .ok_or_else(|| ResolveError::Configuration {
            backend: BACKEND,
            message: format!(
                "no token provided (set vault_token, vault_token_file or {})",
                TOKEN_ENV_VAR
            ),
        })?;

        let resolver = Self::new(
            address,
            token,
            config.vault_namespace.clone(),
            config.vault_token_renew_interval,
        )?;
        log::info!("Vault client initialized for {}", resolver.address);
        Ok(Some(resolver))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn current_token(&self) -> SecretString {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        let builder = builder.header("X-Vault-Token", self.current_token().expose_secret());
        match &self.namespace {
            Some(ns) => builder.header("X-Vault-Namespace", ns),
            None => builder,
        }
    }

    /// Reads the secret at `path`. `Ok(None)` when the path does not exist.
    pub(crate) fn read(
        &self,
        path: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>, ReadFailure> {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        let response = self
            .request(self.http.get(&url))
            .send()
            .map_err(|e| ReadFailure::Other(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let message = error_message(status, response);
            return Err(if status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
                || is_auth_error(&message)
            {
                ReadFailure::Unauthorized(message)
            } else {
                ReadFailure::Other(message)
            });
        }

        let body: SecretResponse = response
            .json()
            .map_err(|e| ReadFailure::Other(format!("invalid response: {}", e)))?;
        Ok(body.data)
    }

    fn read_with_renewal(
        &self,
        path: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>, ResolveError> {
        match self.read(path) {
            Ok(data) => Ok(data),
            Err(ReadFailure::Unauthorized(read_error)) => {
                log::warn!("Vault read of {} was rejected, renewing token: {}", path, read_error);
                if let Err(renew_error) = self.renew() {
                    return Err(ResolveError::RenewalFailed {
                        backend: BACKEND,
                        target: path.to_string(),
                        read_error,
                        renew_error: renew_error.to_string(),
                    });
                }
                self.read(path).map_err(|e| ResolveError::Request {
                    backend: BACKEND,
                    target: path.to_string(),
                    message: format!("after token renewal: {}", e.message()),
                })
            }
            Err(ReadFailure::Other(message)) => Err(ResolveError::Request {
                backend: BACKEND,
                target: path.to_string(),
                message,
            }),
        }
    }
}

fn error_message(status: StatusCode, response: reqwest::blocking::Response) -> String {
    let errors = response
        .json::<ErrorResponse>()
        .map(|body| body.errors)
        .unwrap_or_default();
    if errors.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, errors.join("; "))
    }
}

/// Looks `key` up in a secret payload, descending into the KV v2 `data`
/// object when there is one.
pub(crate) fn extract_key(
    data: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    let secret = match data.get("data") {
        Some(serde_json::Value::Object(nested)) => nested,
        _ => data,
    };
    secret.get(key).map(stringify)
}

impl ExternalResolver for VaultResolver {
    fn scheme(&self) -> &'static str {
        "vault"
    }

    fn lookup(&self, reference: &str, target: &str) -> Result<String, ResolveError> {
        let (path, key) = split_key(target);
        let key = key.unwrap_or_default();
        if path.is_empty() || key.is_empty() {
            return Err(ResolveError::InvalidReference {
                backend: BACKEND,
                reference: reference.to_string(),
                reason: "expected vault:<path>#<key>".to_string(),
            });
        }

        let data = self
            .read_with_renewal(path)?
            .filter(|data| !data.is_empty())
            .ok_or_else(|| ResolveError::NotFound {
                backend: BACKEND,
                target: path.to_string(),
            })?;

        extract_key(&data, key).ok_or_else(|| ResolveError::KeyNotFound {
            backend: BACKEND,
            key: key.to_string(),
            target: path.to_string(),
        })
    }
}

impl RenewableCredential for VaultResolver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn lifetime(&self) -> Option<Duration> {
        Some(self.renew_increment)
    }

    fn renew(&self) -> Result<(), ResolveError> {
        let url = format!("{}/v1/auth/token/renew-self", self.address);
        let body = serde_json::json!({
            "increment": format!("{}s", self.renew_increment.as_secs()),
        });
        let renew_error = |message: String| ResolveError::Renew {
            backend: BACKEND,
            message,
        };

        let response = self
            .request(self.http.post(&url))
            .json(&body)
            .send()
            .map_err(|e| renew_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(renew_error(error_message(status, response)));
        }

        let renewed: RenewResponse = response
            .json()
            .map_err(|e| renew_error(format!("invalid response: {}", e)))?;
        let auth = renewed.auth.ok_or_else(|| renew_error("response has no auth data".to_string()))?;

        if let Some(token) = auth.client_token.filter(|t| !t.is_empty()) {
            *self.token.write().unwrap_or_else(PoisonError::into_inner) = SecretString::from(token);
        }
        log::info!(
            "Vault token renewed (lease {}s)",
            auth.lease_duration.unwrap_or_default()
        );
        Ok(())
    }
}
