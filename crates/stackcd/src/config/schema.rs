use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repos_path: String,
    /// Seconds between reconciliation cycles.
    pub update_interval: u64,
    pub concurrency: usize,
    pub auto_rotate: bool,
    pub sops_secrets_discovery: bool,
    /// Listen address of the external status surface.
    pub address: String,
    pub db_path: String,
    pub global_values_file: Option<String>,
    pub template_folder: Option<String>,
    /// Environment this controller runs in, matched against
    /// [`StackConfig::environments`].
    pub environment: Option<String>,

    pub vault_address: Option<String>,
    pub vault_token: Option<String>,
    pub vault_token_file: Option<String>,
    pub vault_namespace: Option<String>,
    /// Token lifetime in days used to schedule renewals.
    pub vault_token_renew_interval: u64,

    pub consul_address: Option<String>,
    pub consul_token: Option<String>,
    pub consul_token_file: Option<String>,

    pub sops_binary: String,
    pub docker_binary: String,

    pub repos: Option<BTreeMap<String, RepoConfig>>,
    pub stacks: Option<BTreeMap<String, StackConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repos_path: "repos".to_string(),
            update_interval: 120,
            concurrency: DEFAULT_CONCURRENCY,
            auto_rotate: true,
            sops_secrets_discovery: false,
            address: "0.0.0.0:8080".to_string(),
            db_path: "/data/revisions.db".to_string(),
            global_values_file: None,
            template_folder: None,
            environment: None,
            vault_address: None,
            vault_token: None,
            vault_token_file: None,
            vault_namespace: None,
            vault_token_renew_interval: 1,
            consul_address: None,
            consul_token: None,
            consul_token_file: None,
            sops_binary: "sops".to_string(),
            docker_binary: "docker".to_string(),
            repos: None,
            stacks: None,
        }
    }
}

impl Config {
    pub fn repos(&self) -> impl Iterator<Item = (&String, &RepoConfig)> {
        self.repos.iter().flatten()
    }

    pub fn stacks(&self) -> impl Iterator<Item = (&String, &StackConfig)> {
        self.stacks.iter().flatten()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_file: Option<String>,
}

impl RepoConfig {
    /// A repo with no credential fields at all is treated as public.
    pub fn has_credentials(&self) -> bool {
        [&self.username, &self.password, &self.password_file]
            .iter()
            .any(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub repo: String,
    pub branch: String,
    pub compose_file: String,
    pub values_file: Option<String>,
    pub sops_files: Vec<String>,
    pub sops_secrets_discovery: bool,
    /// Environments this stack is deployed to. Empty means all.
    pub environments: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            branch: "main".to_string(),
            compose_file: "docker-compose.yaml".to_string(),
            values_file: None,
            sops_files: Vec::new(),
            sops_secrets_discovery: false,
            environments: Vec::new(),
        }
    }
}
