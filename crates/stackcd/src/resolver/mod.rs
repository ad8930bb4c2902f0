//! External value resolution.
//!
//! Environment values in a manifest may reference external stores, for
//! example `vault:kv/data/prod#DB_PASSWORD` or `consul:config/web#port`.
//! Backends are registered on a [`ResolverChain`]; the first backend whose
//! scheme matches a reference owns it, errors included. References no
//! backend claims are left as they are.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub mod consul;
pub mod environment;
pub mod renewal;
pub mod vault;

#[cfg(test)]
pub(crate) mod test_server;

pub use consul::ConsulResolver;
pub use environment::resolve_environment;
pub use renewal::{renewal_interval, CredentialRenewal, RenewableCredential};
pub use vault::VaultResolver;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid {backend} reference {reference:?}, {reason}")]
    InvalidReference {
        backend: &'static str,
        reference: String,
        reason: String,
    },

    #[error("could not read {backend} path {target}: {message}")]
    Request {
        backend: &'static str,
        target: String,
        message: String,
    },

    #[error("{backend} path {target} not found or empty")]
    NotFound {
        backend: &'static str,
        target: String,
    },

    #[error("key {key} not found at {backend} path {target}")]
    KeyNotFound {
        backend: &'static str,
        key: String,
        target: String,
    },

    #[error("{backend} path {target} does not contain valid JSON: {message}")]
    InvalidJson {
        backend: &'static str,
        target: String,
        message: String,
    },

    #[error("could not read {backend} path {target}: {read_error} (credential renewal also failed: {renew_error})")]
    RenewalFailed {
        backend: &'static str,
        target: String,
        read_error: String,
        renew_error: String,
    },

    #[error("{backend} credential renewal failed: {message}")]
    Renew {
        backend: &'static str,
        message: String,
    },

    #[error("{backend} is not configured: {message}")]
    Configuration {
        backend: &'static str,
        message: String,
    },

    #[error("invalid compose file: service {service} must be a map")]
    InvalidService { service: String },

    #[error("service {service} env {variable}: {source}")]
    Environment {
        service: String,
        variable: String,
        #[source]
        source: Box<ResolveError>,
    },
}

/// A store that values can be read from.
pub trait ExternalResolver: Send + Sync {
    /// Reference prefix claimed by this backend, without the colon.
    fn scheme(&self) -> &'static str;

    /// Reads the value behind a claimed reference. `target` is everything
    /// after `scheme:`.
    fn lookup(&self, reference: &str, target: &str) -> Result<String, ResolveError>;

    /// `None` when the reference belongs to another backend.
    fn resolve(&self, reference: &str) -> Option<Result<String, ResolveError>> {
        let target = reference.strip_prefix(self.scheme())?.strip_prefix(':')?;
        Some(self.lookup(reference, target))
    }
}

/// Outcome of [`ResolverChain::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub value: String,
    /// Whether some backend claimed the reference.
    pub matched: bool,
}

/// Ordered set of registered backends.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn ExternalResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a backend. Earlier registrations take precedence.
    pub fn register(&mut self, resolver: Arc<dyn ExternalResolver>) {
        log::info!("Registered {} resolver", resolver.scheme());
        self.resolvers.push(resolver);
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolves a reference with the first backend that claims it.
    pub fn resolve(&self, reference: &str) -> Result<Resolution, ResolveError> {
        for resolver in &self.resolvers {
            if let Some(result) = resolver.resolve(reference) {
                return result.map(|value| Resolution {
                    value,
                    matched: true,
                });
            }
        }
        Ok(Resolution {
            value: reference.to_string(),
            matched: false,
        })
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.scheme()))
            .finish()
    }
}

/// Renders a JSON value the way it should appear in an environment variable.
pub(crate) fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Splits `target#key`, trimming both halves.
pub(crate) fn split_key(target: &str) -> (&str, Option<&str>) {
    match target.split_once('#') {
        Some((path, key)) => (path.trim(), Some(key.trim())),
        None => (target.trim(), None),
    }
}
