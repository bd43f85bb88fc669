use std::net::SocketAddr;
use std::time::Duration;

use azdo_core::{ClientConfig, RetryPolicy};
use thiserror::Error;

use crate::bamboohr::{BambooConfig, DEFAULT_BAMBOO_BASE_URL};
use crate::sync::{SyncOptions, TeamScopePolicy};

const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const DEFAULT_GRAPH_BASE_URL: &str = "https://vssps.dev.azure.com";
const DEFAULT_BATCH_SIZE: u64 = 50;
const DEFAULT_BATCH_DELAY_MS: u64 = 50;
const DEFAULT_TEAM_DELAY_MS: u64 = 50;
const DEFAULT_ITERATION_DEPTH: u64 = 10;
const DEFAULT_CACHE_TTL_SECS: u64 = 30 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u64 = 3;
const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Required only by commands that talk to Azure DevOps.
    pub organization: Option<String>,
    pub pat: Option<String>,
    pub base_url: String,
    pub graph_base_url: String,
    /// `None` means the per-user data directory.
    pub database_url: Option<String>,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub team_delay: Duration,
    pub iteration_depth: u32,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub max_attempts: u32,
    pub team_scope: TeamScopePolicy,
    pub bamboo: Option<BambooConfig>,
    pub bind: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`. Missing credentials are not an error
    /// here; `client_config` reports them before any client is built.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let organization = optional("AZDO_ORGANIZATION").map(|value| value.trim().to_string());
        let pat = optional("AZDO_PAT").map(|value| value.trim().to_string());
        let read_u64 = |name: &str, default: u64| {
            optional(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };

        let team_scope = match optional("HRSYNC_TEAM_SCOPE") {
            None => TeamScopePolicy::default(),
            Some(value) => TeamScopePolicy::parse(value.trim()).ok_or(ConfigError::InvalidValue {
                name: "HRSYNC_TEAM_SCOPE",
                value,
            })?,
        };

        let bind_value = optional("HRSYNC_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: "HRSYNC_BIND",
                value: bind_value.clone(),
            })?;

        let http_timeout = Duration::from_secs(read_u64(
            "HRSYNC_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        ));
        let max_attempts = read_u64("HRSYNC_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS) as u32;

        let bamboo = match (optional("BAMBOOHR_SUBDOMAIN"), optional("BAMBOOHR_API_KEY")) {
            (Some(subdomain), Some(api_key)) => {
                let mut config = BambooConfig::new(subdomain.trim(), api_key.trim());
                config.base_url = optional("BAMBOOHR_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_BAMBOO_BASE_URL.to_string());
                config.timeout = http_timeout;
                config.retry = RetryPolicy::new(max_attempts);
                Some(config)
            }
            _ => None,
        };

        Ok(Self {
            organization,
            pat,
            base_url: optional("AZDO_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            graph_base_url: optional("AZDO_GRAPH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string()),
            database_url: optional("HRSYNC_DATABASE_URL"),
            batch_size: read_u64("HRSYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE) as usize,
            batch_delay: Duration::from_millis(read_u64(
                "HRSYNC_BATCH_DELAY_MS",
                DEFAULT_BATCH_DELAY_MS,
            )),
            team_delay: Duration::from_millis(read_u64(
                "HRSYNC_TEAM_DELAY_MS",
                DEFAULT_TEAM_DELAY_MS,
            )),
            iteration_depth: read_u64("HRSYNC_ITERATION_DEPTH", DEFAULT_ITERATION_DEPTH) as u32,
            cache_ttl: Duration::from_secs(read_u64("HRSYNC_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)),
            http_timeout,
            max_attempts,
            team_scope,
            bamboo,
            bind,
        })
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let organization = self
            .organization
            .as_deref()
            .ok_or(ConfigError::MissingCredential("AZDO_ORGANIZATION"))?;
        let pat = self
            .pat
            .as_deref()
            .ok_or(ConfigError::MissingCredential("AZDO_PAT"))?;
        let mut config = ClientConfig::new(organization, pat);
        config.base_url = self.base_url.clone();
        config.graph_base_url = self.graph_base_url.clone();
        config.timeout = self.http_timeout;
        config.retry = RetryPolicy::new(self.max_attempts);
        config.cache_ttl = self.cache_ttl;
        config.batch_size = self.batch_size;
        config.batch_delay = self.batch_delay;
        Ok(config)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            iteration_depth: self.iteration_depth,
            ..SyncOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_credentials_only_fail_client_config() {
        let config = Config::from_lookup(lookup(&[("AZDO_ORGANIZATION", "contoso")])).unwrap();
        assert_eq!(config.organization.as_deref(), Some("contoso"));
        assert_eq!(
            config.client_config().unwrap_err(),
            ConfigError::MissingCredential("AZDO_PAT")
        );

        let config = Config::from_lookup(lookup(&[("AZDO_PAT", "  ")])).unwrap();
        assert!(config.pat.is_none());
        assert_eq!(
            config.client_config().unwrap_err(),
            ConfigError::MissingCredential("AZDO_ORGANIZATION")
        );
    }

    #[test]
    fn client_config_carries_settings() {
        let config = Config::from_lookup(lookup(&[
            ("AZDO_ORGANIZATION", " contoso "),
            ("AZDO_PAT", "pat"),
            ("HRSYNC_BATCH_SIZE", "20"),
        ]))
        .unwrap();
        let client = config.client_config().unwrap();
        assert_eq!(client.organization, "contoso");
        assert_eq!(client.batch_size, 20);
        assert_eq!(client.cache_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config =
            Config::from_lookup(lookup(&[("AZDO_ORGANIZATION", "contoso"), ("AZDO_PAT", "pat")]))
                .unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.team_delay, Duration::from_millis(50));
        assert_eq!(config.iteration_depth, 10);
        assert_eq!(config.cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.team_scope, TeamScopePolicy::KeepAll);
        assert!(config.bamboo.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("AZDO_ORGANIZATION", "contoso"),
            ("AZDO_PAT", "pat"),
            ("HRSYNC_BATCH_SIZE", "20"),
            ("HRSYNC_ITERATION_DEPTH", "0"),
            ("HRSYNC_TEAM_SCOPE", "require-active-team-iteration"),
            ("BAMBOOHR_SUBDOMAIN", "acme"),
            ("BAMBOOHR_API_KEY", "key"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.iteration_depth, 10);
        assert_eq!(config.team_scope, TeamScopePolicy::RequireActiveTeamIteration);
        let bamboo = config.bamboo.unwrap();
        assert_eq!(bamboo.subdomain, "acme");
        assert_eq!(bamboo.base_url, DEFAULT_BAMBOO_BASE_URL);
    }

    #[test]
    fn unknown_team_scope_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("AZDO_ORGANIZATION", "contoso"),
            ("AZDO_PAT", "pat"),
            ("HRSYNC_TEAM_SCOPE", "strict"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "HRSYNC_TEAM_SCOPE", .. }));
    }
}
