// Configuration File Support
//
// TOML configuration for Solr Shield with environment variable overrides.
// Roles (quotas) and endpoints (pricing rules) are declared here and handed to
// the shield as immutable maps.
// Default location: XDG config directory, ~/.config/solr-shield/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shield::account::WindowSizes;
use crate::shield::quota::Quota;
use crate::shield::rules::Endpoint;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// User registry configuration
    pub registry: RegistryConfig,

    /// Accounting window sizes
    pub windows: WindowsConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Role id -> quota
    pub roles: HashMap<String, Quota>,

    /// Endpoint id -> pricing rules
    pub endpoints: HashMap<String, Endpoint>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// User registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Idle seconds before an account is reclaimed
    pub stale_after_secs: u64,

    /// Seconds between background sweeps
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60,
            sweep_interval_secs: 60,
        }
    }
}

/// Accounting window sizes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowsConfig {
    /// Short window in milliseconds
    pub short_window_ms: u64,

    /// Long window in milliseconds
    pub long_window_ms: u64,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            short_window_ms: 1000,
            long_window_ms: 60_000,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to register and report Prometheus metrics
    pub enabled: bool,
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// does not validate. A missing file yields the default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        tracing::info!(
            roles = config.roles.len(),
            endpoints = config.endpoints.len(),
            "Loaded configuration from {:?}",
            path
        );
        Ok(config)
    }

    /// Parse, apply environment overrides and validate
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        let config = config.with_ids().apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("org", "solr-shield", "solr-shield") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("solr-shield").join("config.toml")
        }
    }

    /// Copy table keys into the role and endpoint ids
    fn with_ids(mut self) -> Self {
        for (id, quota) in self.roles.iter_mut() {
            quota.id = id.clone();
        }
        for (id, endpoint) in self.endpoints.iter_mut() {
            endpoint.id = id.clone();
        }
        self
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - SOLR_SHIELD_LOG_LEVEL
    /// - SOLR_SHIELD_LOG_FORMAT
    /// - SOLR_SHIELD_STALE_SECS
    /// - SOLR_SHIELD_SWEEP_SECS
    /// - SOLR_SHIELD_METRICS_ENABLED
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("SOLR_SHIELD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SOLR_SHIELD_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(secs) = std::env::var("SOLR_SHIELD_STALE_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.registry.stale_after_secs = secs;
                }
            }
        }
        if let Ok(secs) = std::env::var("SOLR_SHIELD_SWEEP_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.registry.sweep_interval_secs = secs;
                }
            }
        }

        if let Ok(enabled) = std::env::var("SOLR_SHIELD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        if self.windows.short_window_ms == 0 {
            anyhow::bail!("Short window must be > 0 ms");
        }
        if self.windows.long_window_ms < self.windows.short_window_ms {
            anyhow::bail!("Long window must not be shorter than the short window");
        }

        if self.registry.sweep_interval_secs == 0 {
            anyhow::bail!("Sweep interval must be > 0 seconds");
        }
        // Reclaiming an account early would forget charges still inside the long window
        if self.registry.stale_after_secs.saturating_mul(1000) < self.windows.long_window_ms {
            anyhow::bail!(
                "Staleness threshold ({}s) must cover the long window ({}ms)",
                self.registry.stale_after_secs,
                self.windows.long_window_ms
            );
        }

        for quota in self.roles.values() {
            quota.validate()?;
        }
        for endpoint in self.endpoints.values() {
            endpoint.validate()?;
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging.level.to_lowercase().parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    pub fn window_sizes(&self) -> WindowSizes {
        WindowSizes {
            short: Duration::from_millis(self.windows.short_window_ms),
            long: Duration::from_millis(self.windows.long_window_ms),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.registry.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.registry.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[logging]
level = "debug"
format = "json"

[registry]
stale_after_secs = 120
sweep_interval_secs = 30

[roles.basic]
single_call_max_cost = 100
short_window_max_cost = 150
short_window_max_calls = 3
long_window_max_cost = 1000
long_window_max_calls = 60

[roles.researcher]
single_call_max_cost = 1000
short_window_max_cost = 2000
short_window_max_calls = 20
long_window_max_cost = 50000
long_window_max_calls = 1000

[endpoints.books]
base = { add = 1 }

[endpoints.books.arguments.rows]
default = { add = 1 }
rules = [ { type = "integer", max = 100, cost = { add = 1 } } ]
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.registry.stale_after_secs, 60);
        assert_eq!(config.windows.short_window_ms, 1000);
        assert_eq!(config.windows.long_window_ms, 60_000);
        assert!(!config.metrics.enabled);
        assert!(config.roles.is_empty());
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_windows() {
        let mut config = Config::default();
        config.windows.short_window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.windows.long_window_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_stale_shorter_than_long_window() {
        let mut config = Config::default();
        config.registry.stale_after_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_huge_stale_threshold() {
        let mut config = Config::default();
        config.registry.stale_after_secs = u64::MAX;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_finite_endpoint_cost_is_rejected() {
        let result = Config::from_toml(
            r#"
[endpoints.books]
base = { add = inf, multiply = 0 }
"#,
        );
        assert!(result.is_err());

        let result = Config::from_toml(
            r#"
[endpoints.books.arguments.rows]
rules = [ { type = "any", cost = { add = nan } } ]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation_bad_role() {
        let mut config = Config::default();
        let mut quota = Quota::unlimited("broken");
        quota.single_call_max_cost = -5.0;
        config.roles.insert("broken".to_string(), quota);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path);
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), SAMPLE).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.stale_after(), Duration::from_secs(120));
        assert_eq!(config.roles.len(), 2);
        assert_eq!(config.roles["basic"].id, "basic");
        assert_eq!(config.roles["basic"].short_window_max_calls, 3);
        assert_eq!(config.endpoints["books"].id, "books");
        assert_eq!(config.endpoints["books"].arguments["rows"].rules.len(), 1);
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[logging\nlevel = \"debug\"\n").unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_role_missing_limit_is_rejected() {
        let result = Config::from_toml(
            r#"
[roles.partial]
single_call_max_cost = 10
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::remove_var("SOLR_SHIELD_SWEEP_SECS");
        std::env::set_var("SOLR_SHIELD_SWEEP_SECS", "15");
        std::env::set_var("SOLR_SHIELD_METRICS_ENABLED", "true");

        let config = Config::default().apply_env_overrides();
        assert_eq!(config.registry.sweep_interval_secs, 15);
        assert!(config.metrics.enabled);

        std::env::remove_var("SOLR_SHIELD_SWEEP_SECS");
        std::env::remove_var("SOLR_SHIELD_METRICS_ENABLED");
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        std::env::set_var("SOLR_SHIELD_STALE_SECS", "0");
        let config = Config::default().apply_env_overrides();
        assert_eq!(config.registry.stale_after_secs, 60);
        std::env::remove_var("SOLR_SHIELD_STALE_SECS");
    }

    #[test]
    fn test_window_sizes() {
        let sizes = Config::default().window_sizes();
        assert_eq!(sizes, WindowSizes::default());
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }
}
