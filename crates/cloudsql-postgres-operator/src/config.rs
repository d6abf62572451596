use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::cloudsql::client::DEFAULT_ENDPOINT;
use crate::crds::postgresql_instance::APPLICATION_NAME;

pub const DEFAULT_PROXY_IMAGE: &str = "gcr.io/cloudsql-docker/gce-proxy:1.14";
pub const DEFAULT_PROXY_CREDENTIALS_PATH: &str = "/secret/client/credentials.json";
pub const DEFAULT_WEBHOOK_BIND_ADDRESS: &str = "0.0.0.0:443";
pub const DEFAULT_CONTROLLER_WORKERS: u16 = 1;
pub const DEFAULT_RESYNC_PERIOD_SECONDS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Operator settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub namespace: String,
    pub project_id: String,
    pub cloudsql_endpoint: String,
    /// Static bearer token for the Cloud SQL Admin API; the metadata server is used when unset.
    pub cloudsql_access_token: Option<String>,
    pub proxy_image: String,
    pub proxy_credentials_path: String,
    pub webhook_bind_address: SocketAddr,
    pub controller_workers: u16,
    pub resync_period: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let or_default = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let project_id = get("GCP_PROJECT_ID").ok_or(ConfigError::Missing("GCP_PROJECT_ID"))?;
        let webhook_bind_address = parse(
            "WEBHOOK_BIND_ADDRESS",
            or_default("WEBHOOK_BIND_ADDRESS", DEFAULT_WEBHOOK_BIND_ADDRESS),
        )?;
        let controller_workers: u16 = parse(
            "CONTROLLER_WORKERS",
            or_default("CONTROLLER_WORKERS", &DEFAULT_CONTROLLER_WORKERS.to_string()),
        )?;
        if controller_workers == 0 {
            return Err(ConfigError::Invalid {
                name: "CONTROLLER_WORKERS",
                value: "0".into(),
            });
        }
        let resync_seconds: u64 = parse(
            "RESYNC_PERIOD_SECONDS",
            or_default("RESYNC_PERIOD_SECONDS", &DEFAULT_RESYNC_PERIOD_SECONDS.to_string()),
        )?;

        Ok(Config {
            namespace: or_default("OPERATOR_NAMESPACE", APPLICATION_NAME),
            project_id,
            cloudsql_endpoint: or_default("CLOUDSQL_API_ENDPOINT", DEFAULT_ENDPOINT),
            cloudsql_access_token: get("CLOUDSQL_ACCESS_TOKEN"),
            proxy_image: or_default("PROXY_IMAGE", DEFAULT_PROXY_IMAGE),
            proxy_credentials_path: or_default(
                "PROXY_CREDENTIALS_PATH",
                DEFAULT_PROXY_CREDENTIALS_PATH,
            ),
            webhook_bind_address,
            controller_workers,
            resync_period: Duration::from_secs(resync_seconds),
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

#[cfg(test)]
mod tests_config {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_project_is_set() {
        let cfg = config(&[("GCP_PROJECT_ID", "my-project")]).unwrap();
        assert_eq!(cfg.namespace, "cloudsql-postgres-operator");
        assert_eq!(cfg.cloudsql_endpoint, "https://sqladmin.googleapis.com");
        assert_eq!(cfg.proxy_image, DEFAULT_PROXY_IMAGE);
        assert_eq!(cfg.webhook_bind_address.port(), 443);
        assert_eq!(cfg.controller_workers, 1);
        assert_eq!(cfg.resync_period, Duration::from_secs(300));
        assert_eq!(cfg.cloudsql_access_token, None);
    }

    #[test]
    fn project_is_required() {
        assert_eq!(config(&[]), Err(ConfigError::Missing("GCP_PROJECT_ID")));
        assert_eq!(
            config(&[("GCP_PROJECT_ID", "")]),
            Err(ConfigError::Missing("GCP_PROJECT_ID"))
        );
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config(&[("GCP_PROJECT_ID", "p"), ("CONTROLLER_WORKERS", "many")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for CONTROLLER_WORKERS: \"many\""
        );
        assert!(config(&[("GCP_PROJECT_ID", "p"), ("CONTROLLER_WORKERS", "0")]).is_err());
        assert!(config(&[("GCP_PROJECT_ID", "p"), ("WEBHOOK_BIND_ADDRESS", "nowhere")]).is_err());
    }
}
