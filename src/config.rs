//! Monitor configuration.
//!
//! Loaded from TOML by the orchestrator and passed to recorder
//! constructors by reference.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Recording configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Time between readouts of interval-based recorders, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Ring-buffer pages per tracepoint source. Must be a power of two.
    #[serde(default = "default_mmap_pages")]
    pub mmap_pages: usize,

    /// Tracepoint events to record globally ("group:name" or
    /// "group/name"). Usually requires root.
    #[serde(default)]
    pub tracepoint_events: Vec<String>,

    /// Counter events to record per thread. Empty selects the platform
    /// default set.
    #[serde(default)]
    pub perf_events: Vec<String>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_interval_ms() -> u64 {
    100
}

fn default_mmap_pages() -> usize {
    16
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            mmap_pages: default_mmap_pages(),
            tracepoint_events: Vec::new(),
            perf_events: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Sampling interval of interval-based recorders.
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be non-zero".to_string());
        }
        if self.mmap_pages == 0 || !self.mmap_pages.is_power_of_two() {
            return Err(format!(
                "mmap_pages must be a non-zero power of two, got {}",
                self.mmap_pages
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter used when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include thread names in log lines. Recorder threads are named
    /// after their device or event set.
    #[serde(default = "default_true")]
    pub thread_names: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            thread_names: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.interval_ms, 100);
        assert_eq!(config.mmap_pages, 16);
        assert!(config.tracepoint_events.is_empty());
        assert!(config.perf_events.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            interval_ms = 10
            mmap_pages = 8
            tracepoint_events = ["sched:sched_switch", "power:cpu_frequency"]
            perf_events = ["instructions"]

            [logging]
            level = "debug"
            format = "compact"
            "#,
        )
        .unwrap();
        assert_eq!(config.read_interval(), Duration::from_millis(10));
        assert_eq!(config.tracepoint_events.len(), 2);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mmap_pages = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1").is_err());
    }
}
