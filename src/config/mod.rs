//! Configuration management for scanlink

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default API base URL
pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";

const ENV_API_URL: &str = "SCANLINK_API_URL";
const ENV_CACHE_TTL_MS: &str = "SCANLINK_CACHE_TTL_MS";
const ENV_DEBUG: &str = "SCANLINK_DEBUG";

/// Client configuration.
///
/// Durations are stored as milliseconds so the YAML file stays readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST API; the WebSocket URL is derived from it
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default TTL for cacheable GET responses
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,

    /// Per-attempt request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each subsequent one
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Reconnect attempts before the live-event socket gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// How often expired cache entries are swept
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_cache_sweep_interval_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            cache_ttl_ms: default_cache_ttl_ms(),
            debug: false,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
        }
    }
}

impl Config {
    /// Directory holding the config file and the persisted session
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".scanlink"))
    }

    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::default_dir()?.join("config.yaml"))
    }

    /// Resolve an optional override to a concrete path
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Self::default_path(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound.into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Load from the given (or default) path, falling back to defaults when
    /// no file exists, then apply environment overrides.
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        let mut config = match Self::load_from(&path) {
            Ok(config) => config,
            Err(crate::error::Error::Config(ConfigError::NotFound)) => Config::default(),
            Err(e) => return Err(e),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides; `lookup` abstracts the environment for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL_MS) {
            self.cache_ttl_ms = ttl.parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_CACHE_TTL_MS} must be an integer, got {ttl}"))
            })?;
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.debug = matches!(debug.as_str(), "1" | "true" | "yes");
        }
        self.validate()
    }

    /// Check that the base URL is an HTTP(S) URL and that intervals which
    /// drive timers are non-zero
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api_url must start with http:// or https://, got {}",
                self.api_url
            ))
            .into());
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be greater than 0".to_string()).into());
        }
        if self.cache_sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "cache_sweep_interval_ms must be greater than 0".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }
}
