//! Consul KV backend.
//!
//! `consul:<key>` yields the raw value stored at `key`;
//! `consul:<key>#<field>` parses the value as a JSON object and yields one
//! field of it.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use super::renewal::RenewableCredential;
use super::vault::is_auth_error;
use super::{split_key, stringify, ExternalResolver, ResolveError};
use crate::config::Config;
use crate::secrets::resolve_secret_optional;

const BACKEND: &str = "Consul";
const TOKEN_ENV_VAR: &str = "CONSUL_TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the ACL token comes from. Kept so renewal can re-read it.
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    pub direct: Option<String>,
    pub file: Option<String>,
}

impl TokenSource {
    fn load(&self) -> Result<Option<SecretString>, ResolveError> {
        resolve_secret_optional(
            self.direct.as_deref(),
            self.file.as_deref(),
            Some(TOKEN_ENV_VAR),
        )
        .map_err(|e| ResolveError::Configuration {
            backend: BACKEND,
            message: e.to_string(),
        })
    }
}

enum Fetch {
    Value(String),
    Missing,
    Unauthorized(String),
}

pub struct ConsulResolver {
    http: Client,
    address: String,
    source: TokenSource,
    token: RwLock<Option<SecretString>>,
}

impl ConsulResolver {
    pub fn new(address: &str, source: TokenSource) -> Result<Self, ResolveError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ResolveError::Configuration {
                backend: BACKEND,
                message: format!("could not create HTTP client: {}", e),
            })?;
        let token = source.load()?;

        Ok(Self {
            http,
            address: address.trim_end_matches('/').to_string(),
            source,
            token: RwLock::new(token),
        })
    }

    /// `Ok(None)` when no Consul address is configured. The token is
    /// optional; agents without ACLs accept anonymous reads.
    pub fn from_config(config: &Config) -> Result<Option<Self>, ResolveError> {
        let Some(address) = config.consul_address.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let source = TokenSource {
            direct: config.consul_token.clone(),
            file: config.consul_token_file.clone(),
        };
        let resolver = Self::new(address, source)?;
        log::info!("Consul client initialized for {}", resolver.address);
        Ok(Some(resolver))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn fetch(&self, key: &str) -> Result<Fetch, ResolveError> {
        let url = format!("{}/v1/kv/{}?raw", self.address, key.trim_start_matches('/'));
        let mut request = self.http.get(&url);
        if let Some(token) = self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            request = request.header("X-Consul-Token", token.expose_secret());
        }

        let response = request.send().map_err(|e| ResolveError::Request {
            backend: BACKEND,
            target: key.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Fetch::Missing);
        }

        let body = response.text().map_err(|e| ResolveError::Request {
            backend: BACKEND,
            target: key.to_string(),
            message: e.to_string(),
        })?;
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || (!status.is_success() && is_auth_error(&body))
        {
            return Ok(Fetch::Unauthorized(format!("HTTP {}: {}", status, body.trim())));
        }
        if !status.is_success() {
            return Err(ResolveError::Request {
                backend: BACKEND,
                target: key.to_string(),
                message: format!("HTTP {}: {}", status, body.trim()),
            });
        }
        Ok(Fetch::Value(body))
    }

    fn fetch_with_renewal(&self, key: &str) -> Result<Option<String>, ResolveError> {
        match self.fetch(key)? {
            Fetch::Value(value) => Ok(Some(value)),
            Fetch::Missing => Ok(None),
            Fetch::Unauthorized(read_error) => {
                if let Err(e) = self.renew() {
                    return Err(ResolveError::RenewalFailed {
                        backend: BACKEND,
                        target: key.to_string(),
                        read_error,
                        renew_error: e.to_string(),
                    });
                }
                match self.fetch(key)? {
                    Fetch::Value(value) => Ok(Some(value)),
                    Fetch::Missing => Ok(None),
                    Fetch::Unauthorized(message) => Err(ResolveError::Request {
                        backend: BACKEND,
                        target: key.to_string(),
                        message: format!("after token renewal: {}", message),
                    }),
                }
            }
        }
    }
}

/// Extracts `field` from a JSON object stored at `key`.
pub(crate) fn extract_field(key: &str, raw: &str, field: &str) -> Result<String, ResolveError> {
    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ResolveError::InvalidJson {
            backend: BACKEND,
            target: key.to_string(),
            message: e.to_string(),
        })?;
    parsed
        .get(field)
        .map(stringify)
        .ok_or_else(|| ResolveError::KeyNotFound {
            backend: BACKEND,
            key: field.to_string(),
            target: key.to_string(),
        })
}

impl ExternalResolver for ConsulResolver {
    fn scheme(&self) -> &'static str {
        "consul"
    }

    fn lookup(&self, reference: &str, target: &str) -> Result<String, ResolveError> {
        let (key, field) = split_key(target);
        if key.is_empty() {
            return Err(ResolveError::InvalidReference {
                backend: BACKEND,
                reference: reference.to_string(),
                reason: "expected consul:<key> or consul:<key>#<field>".to_string(),
            });
        }
        if field == Some("") {
            return Err(ResolveError::InvalidReference {
                backend: BACKEND,
                reference: reference.to_string(),
                reason: "field after '#' must not be empty".to_string(),
            });
        }

        let raw = self
            .fetch_with_renewal(key)?
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| ResolveError::NotFound {
                backend: BACKEND,
                target: key.to_string(),
            })?;

        match field {
            Some(field) => extract_field(key, &raw, field),
            None => Ok(raw),
        }
    }
}

impl RenewableCredential for ConsulResolver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    /// ACL tokens are rotated out of band, so there is nothing to schedule.
    fn lifetime(&self) -> Option<Duration> {
        None
    }

    /// Re-reads the token from its source.
    fn renew(&self) -> Result<(), ResolveError> {
        let token = self.source.load()?;
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
        log::info!("Consul token reloaded");
        Ok(())
    }
}
