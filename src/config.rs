// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Every field has a default so an empty or missing file still yields a working config

use crate::hub::HubOptions;
use crate::paths;
use anyhow::{Context, Result};
use relay_core::bus::BusConfig;
use relay_core::router::RouterConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Local config file checked after RELAY_CONFIG_PATH
pub const LOCAL_CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub router: RouterConfig,
    /// Users granted write permission (approve/reject)
    #[serde(default)]
    pub write_users: Vec<String>,
    /// Broadcast channel override applied to every adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,
    /// Per-adapter tables, handed to each adapter's factory as JSON
    #[serde(default)]
    pub adapters: HashMap<String, Value>,
    /// Port for the Prometheus exporter; disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_project() -> String {
    relay_core::formatter::UNKNOWN_PROJECT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: default_project(),
            bus: BusConfig::default(),
            router: RouterConfig::default(),
            write_users: Vec::new(),
            default_channel: None,
            adapters: HashMap::new(),
            metrics_port: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    val.trim()
        .parse()
        .with_context(|| format!("{} must be a valid number, got: {}", key, val))
}

fn split_users(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. RELAY_CONFIG_PATH env var (if set)
    /// 2. ./relay.toml (current directory - for development)
    /// 3. ~/.config/agent-relay/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("RELAY_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "RELAY_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Parse one config file without applying environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    /// Searches: RELAY_CONFIG_PATH, ./relay.toml, then ~/.config/agent-relay/config.toml
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            Self::from_file(&config_path)?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply RELAY_* environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("RELAY_PROJECT") {
            self.project = val;
        }
        if let Ok(val) = std::env::var("RELAY_WRITE_USERS") {
            self.write_users = split_users(&val);
        }
        if let Ok(val) = std::env::var("RELAY_MAX_RETRIES") {
            self.bus.max_retries = parse_env("RELAY_MAX_RETRIES", &val)?;
        }
        if let Ok(val) = std::env::var("RELAY_MAX_DEAD_LETTERS") {
            self.bus.max_dead_letters = parse_env("RELAY_MAX_DEAD_LETTERS", &val)?;
        }
        if let Ok(val) = std::env::var("RELAY_RATE_LIMIT_WINDOW_SECS") {
            self.router.rate_limit_window_secs = parse_env("RELAY_RATE_LIMIT_WINDOW_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("RELAY_RATE_LIMIT_MAX") {
            self.router.rate_limit_max = parse_env("RELAY_RATE_LIMIT_MAX", &val)?;
        }
        if let Ok(val) = std::env::var("RELAY_METRICS_PORT") {
            self.metrics_port = Some(parse_env("RELAY_METRICS_PORT", &val)?);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.project.trim().is_empty() {
            anyhow::bail!("project must not be empty (set in config or RELAY_PROJECT env var)");
        }
        if self.router.rate_limit_window_secs == 0 {
            anyhow::bail!("router.rate_limit_window_secs must be greater than zero");
        }
        if self.router.rate_limit_max == 0 {
            anyhow::bail!("router.rate_limit_max must be greater than zero");
        }
        self.write_users.retain(|u| !u.trim().is_empty());
        for (name, table) in &self.adapters {
            if !table.is_object() {
                anyhow::bail!("adapters.{} must be a table", name);
            }
        }
        Ok(())
    }

    /// Hub construction options derived from this config
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            project: self.project.clone(),
            bus: self.bus.clone(),
            router: self.router.clone(),
            write_users: self.write_users.clone(),
            adapter_configs: self.adapters.clone(),
            default_channel: self.default_channel.clone(),
            ..HubOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.project, "unknown");
        assert_eq!(config.bus.max_retries, 3);
        assert_eq!(config.bus.max_dead_letters, 100);
        assert_eq!(config.router.rate_limit_window_secs, 60);
        assert_eq!(config.router.rate_limit_max, 10);
        assert!(config.adapters.is_empty());
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn test_adapter_tables_become_json() {
        let config: Config = toml::from_str(
            r#"
project = "relay"
write_users = ["alice"]

[bus]
max_retries = 5

[adapters.jsonl]
path = "/tmp/out.jsonl"
"#,
        )
        .unwrap();
        assert_eq!(config.bus.max_retries, 5);
        assert_eq!(config.bus.max_dead_letters, 100);
        assert_eq!(config.adapters["jsonl"]["path"], "/tmp/out.jsonl");

        let options = config.hub_options();
        assert_eq!(options.project, "relay");
        assert_eq!(options.write_users, vec!["alice".to_string()]);
        assert_eq!(options.adapter_configs["jsonl"]["path"], "/tmp/out.jsonl");
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let mut config = Config::default();
        config.router.rate_limit_max = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_users() {
        assert_eq!(
            split_users(" alice, ,bob "),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }
}
