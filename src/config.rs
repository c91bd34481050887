//! Configuration Management
//!
//! Loads the fetch configuration from a YAML (or JSON) file, then applies
//! environment and command line overrides.

use crate::error::FetchError;
use crate::gcp::client::Endpoints;
use crate::gcp::retry::RetryConfig;
use crate::resource::{all_tables, get_table, TableDef};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding an inline service account key
pub const SERVICE_ACCOUNT_KEY_ENV: &str = "GCP_FETCH_SERVICE_ACCOUNT_KEY_JSON";

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter passed to the Resource Manager projects list call
    pub project_filter: Option<String>,
    /// Explicit projects; skips discovery when non-empty
    pub project_ids: Vec<String>,
    /// Service account key passed by value
    pub service_account_key_json: Option<String>,
    /// Tables to fetch; empty means every registered table
    pub tables: Vec<String>,
    /// Maximum number of (project, table) fetches in flight
    pub concurrency: usize,
    /// Capacity of each per-table output channel
    pub channel_capacity: usize,
    /// API error reasons treated as "skip this table for this project"
    pub ignore_error_reasons: Vec<String>,
    pub retry: RetryConfig,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_filter: None,
            project_ids: Vec::new(),
            service_account_key_json: None,
            tables: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            ignore_error_reasons: Vec::new(),
            retry: RetryConfig::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcp-fetch").join("config.yaml"))
    }

    /// Load configuration from an explicit path, or from the default location
    /// if it exists. A missing default file yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse YAML or JSON content
    pub fn from_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fill the service account key from the environment if none was given
    pub fn apply_env(&mut self) {
        if self.service_account_key_json.is_none() {
            if let Ok(key) = std::env::var(SERVICE_ACCOUNT_KEY_ENV) {
                if !key.trim().is_empty() {
                    self.service_account_key_json = Some(key);
                }
            }
        }
    }

    /// Definitions of the configured tables, or of every table when none are named
    pub fn selected_tables(&self) -> std::result::Result<Vec<&'static TableDef>, FetchError> {
        if self.tables.is_empty() {
            return Ok(all_tables());
        }
        self.tables
            .iter()
            .map(|name| {
                get_table(name)
                    .ok_or_else(|| FetchError::configuration(format!("unknown table `{}`", name)))
            })
            .collect()
    }

    /// Reject settings that would make every fetch fail
    pub fn validate(&self) -> std::result::Result<(), FetchError> {
        if self.concurrency == 0 {
            return Err(FetchError::configuration("concurrency must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(FetchError::configuration(
                "channel_capacity must be at least 1",
            ));
        }
        self.selected_tables()?;
        self.endpoints.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.project_ids.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parses_yaml() {
        let config = Config::from_str(
            r#"
project_filter: "labels.env:prod"
project_ids: [alpha-project, beta-project]
tables: [gcp_compute_vpn_gateways]
concurrency: 2
ignore_error_reasons: [notFound]
retry:
  max_retries: 2
  base_wait_ms: 10
"#,
        )
        .unwrap();

        assert_eq!(config.project_filter.as_deref(), Some("labels.env:prod"));
        assert_eq!(config.project_ids, vec!["alpha-project", "beta-project"]);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_wait_ms, 10);
        assert_eq!(config.ignore_error_reasons, vec!["notFound"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parses_json() {
        let config =
            Config::from_str(r#"{"project_ids": ["alpha-project"], "channel_capacity": 5}"#)
                .unwrap();
        assert_eq!(config.project_ids, vec!["alpha-project"]);
        assert_eq!(config.channel_capacity, 5);
    }

    #[test]
    fn test_validate_rejects_unknown_table() {
        let config = Config {
            tables: vec!["gcp_nope".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FetchError::Configuration(_))
        ));
    }

    #[test]
    fn test_selected_tables() {
        let all = Config::default().selected_tables().unwrap();
        assert_eq!(all.len(), all_tables().len());

        let config = Config {
            tables: vec!["gcp_compute_addresses".to_string()],
            ..Config::default()
        };
        let selected = config.selected_tables().unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "gcp_compute_addresses");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "project_ids: [gamma-project]\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.project_ids, vec!["gamma-project"]);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
