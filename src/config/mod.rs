//! Configuration management for the volley dispatcher
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Dispatch engine configuration
    pub dispatch: DispatchConfig,

    /// Gateway configuration
    pub gateway: GatewayConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Dispatch-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Global send pacer in messages per second (0 disables)
    pub messages_per_second: u32,

    /// Bound on proxied connection attempts, seconds
    pub proxy_timeout_secs: u64,

    /// Wait for in-flight attempts after a stop request, seconds
    pub grace_period_secs: u64,

    /// Default fan-out of concurrent account workers
    pub default_thread_count: usize,

    /// Default minimum inter-send delay, seconds
    pub default_min_delay_secs: u64,

    /// Default maximum inter-send delay, seconds
    pub default_max_delay_secs: u64,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL
    pub base_url: String,

    /// Directory holding account session files
    pub session_dir: PathBuf,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let messages_per_second = std::env::var("VOLLEY_MESSAGES_PER_SECOND")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        let proxy_timeout_secs = std::env::var("VOLLEY_PROXY_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let grace_period_secs = std::env::var("VOLLEY_GRACE_PERIOD")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3);

        let default_thread_count = std::env::var("VOLLEY_THREAD_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1);

        let default_min_delay_secs = std::env::var("VOLLEY_MIN_DELAY")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(2);

        let default_max_delay_secs = std::env::var("VOLLEY_MAX_DELAY")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(6);

        let base_url = std::env::var("VOLLEY_GATEWAY_URL")
            .unwrap_or_else(|_| String::from("http://localhost:8880"));

        let session_dir = std::env::var("VOLLEY_SESSION_DIR")
            .unwrap_or_else(|_| String::from("data/sessions"))
            .into();

        let sqlite_path = std::env::var("VOLLEY_SQLITE_PATH")
            .unwrap_or_else(|_| String::from("data/volley.db"))
            .into();

        let log_level = std::env::var("VOLLEY_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("VOLLEY_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            dispatch: DispatchConfig {
                messages_per_second,
                proxy_timeout_secs,
                grace_period_secs,
                default_thread_count,
                default_min_delay_secs,
                default_max_delay_secs,
            },
            gateway: GatewayConfig {
                base_url,
                session_dir,
            },
            database: DatabaseConfig { sqlite_path },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.default_thread_count == 0 {
            anyhow::bail!("default_thread_count must be greater than 0");
        }

        if self.dispatch.default_min_delay_secs > self.dispatch.default_max_delay_secs {
            anyhow::bail!("default_min_delay_secs must not exceed default_max_delay_secs");
        }

        if self.dispatch.proxy_timeout_secs == 0 {
            anyhow::bail!("proxy_timeout_secs must be greater than 0");
        }

        if self.gateway.base_url.is_empty() {
            anyhow::bail!("gateway base_url must not be empty");
        }

        Ok(())
    }

    /// Proxied connection bound as a Duration
    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.proxy_timeout_secs)
    }

    /// Stop grace period as a Duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.dispatch.grace_period_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig {
                messages_per_second: 1,
                proxy_timeout_secs: 30,
                grace_period_secs: 3,
                default_thread_count: 1,
                default_min_delay_secs: 2,
                default_max_delay_secs: 6,
            },
            gateway: GatewayConfig {
                base_url: String::from("http://localhost:8880"),
                session_dir: PathBuf::from("data/sessions"),
            },
            database: DatabaseConfig {
                sqlite_path: PathBuf::from("data/volley.db"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_thread_count_rejected() {
        let mut config = Config::default();
        config.dispatch.default_thread_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_delay_range_rejected() {
        let mut config = Config::default();
        config.dispatch.default_min_delay_secs = 10;
        config.dispatch.default_max_delay_secs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.proxy_timeout(), Duration::from_secs(30));
        assert_eq!(config.grace_period(), Duration::from_secs(3));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let config = Config::default();
        let toml_text = toml::to_string(&config).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volley.toml");
        std::fs::write(&path, toml_text).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.dispatch.grace_period_secs, 3);
        assert_eq!(loaded.gateway.base_url, config.gateway.base_url);
    }
}
