//! WolfLease Configuration
//!
//! This module provides configuration structures for the leader
//! election coordinator and the demo node runner.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main WolfLease configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfLeaseConfig {
    /// Election coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// In-memory lease service used by `wolflease run`
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Election coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Lease key every member of the fleet competes for
    #[serde(default = "default_key")]
    pub key: String,

    /// Lease time-to-live in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Renewal interval in milliseconds (must be below ttl_ms)
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,

    /// Delay between election attempts in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Demo lease service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Number of competing coordinators to run
    #[serde(default = "default_nodes")]
    pub nodes: usize,

    /// Probability of an injected service error per call
    #[serde(default)]
    pub failure_rate: f64,
}

// Default value functions
fn default_key() -> String {
    "coordinator:leader".to_string()
}

fn default_ttl_ms() -> u64 {
    10_000
}

fn default_renew_interval_ms() -> u64 {
    5_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_nodes() -> usize {
    3
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            key: default_key(),
            ttl_ms: default_ttl_ms(),
            renew_interval_ms: default_renew_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            failure_rate: 0.0,
        }
    }
}

impl CoordinatorConfig {
    /// Build a configuration from durations
    pub fn new(
        key: impl Into<String>,
        ttl: Duration,
        renew_interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            ttl_ms: duration_ms(ttl),
            renew_interval_ms: duration_ms(renew_interval),
            retry_interval_ms: duration_ms(retry_interval),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.key.is_empty() {
            return Err(crate::Error::Config("coordinator.key cannot be empty".into()));
        }

        if self.ttl_ms == 0 {
            return Err(crate::Error::Config("coordinator.ttl_ms must be positive".into()));
        }

        if self.renew_interval_ms == 0 {
            return Err(crate::Error::Config(
                "coordinator.renew_interval_ms must be positive".into(),
            ));
        }

        if self.retry_interval_ms == 0 {
            return Err(crate::Error::Config(
                "coordinator.retry_interval_ms must be positive".into(),
            ));
        }

        if self.renew_interval_ms >= self.ttl_ms {
            return Err(crate::Error::Config(format!(
                "coordinator.renew_interval_ms ({}) must be less than ttl_ms ({})",
                self.renew_interval_ms, self.ttl_ms
            )));
        }

        Ok(())
    }

    /// Get lease ttl as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Get renewal interval as Duration
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    /// Get election retry interval as Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl WolfLeaseConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfLeaseConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.coordinator.validate()?;

        if self.service.nodes == 0 {
            return Err(crate::Error::Config("service.nodes must be at least 1".into()));
        }

        if !(0.0..=1.0).contains(&self.service.failure_rate) {
            return Err(crate::Error::Config(
                "service.failure_rate must be between 0 and 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[coordinator]
key = "billing:leader"
ttl_ms = 3000
renew_interval_ms = 1000
retry_interval_ms = 500

[logging]
level = "debug"

[service]
nodes = 5
failure_rate = 0.05
"#;

        let config = WolfLeaseConfig::from_str(toml).unwrap();
        assert_eq!(config.coordinator.key, "billing:leader");
        assert_eq!(config.coordinator.ttl(), Duration::from_secs(3));
        assert_eq!(config.coordinator.renew_interval(), Duration::from_secs(1));
        assert_eq!(config.coordinator.retry_interval(), Duration::from_millis(500));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.service.nodes, 5);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = WolfLeaseConfig::from_str("").unwrap();
        assert_eq!(config.coordinator, CoordinatorConfig::default());
        assert_eq!(config.coordinator.ttl_ms, 10_000);
        assert_eq!(config.coordinator.renew_interval_ms, 5_000);
        assert_eq!(config.coordinator.retry_interval_ms, 1_000);
    }

    #[test]
    fn test_renew_must_be_below_ttl() {
        let config = CoordinatorConfig::new(
            "leader",
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let toml = "[coordinator]\nttl_ms = 1000\nrenew_interval_ms = 2000\n";
        assert!(WolfLeaseConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_rejects_empty_key_and_zero_intervals() {
        let mut config = CoordinatorConfig::default();
        config.key.clear();
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.retry_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wolflease.toml");

        let mut config = WolfLeaseConfig::default();
        config.coordinator.key = "jobs:leader".into();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = WolfLeaseConfig::from_file(&path).unwrap();
        assert_eq!(loaded.coordinator.key, "jobs:leader");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = WolfLeaseConfig::from_file(std::path::Path::new("/nonexistent/wolflease.toml"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
