//! Configuration for the nftables exporter.
//!
//! Settings come from, in increasing priority: built-in defaults, a JSON5
//! file, then environment variables named after the upper-cased keys
//! (`LISTENADDR`, `MAXREQUESTSINFLIGHT`, `TIMEOUT`, `OPENMETRICS`,
//! `NFTBINARY`). The command line may override the listen address last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "nftables-exporter.json5";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid value for environment variable {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExporterConfig {
    /// Address to listen on (default: ":9923").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Maximum number of concurrent scrapes, 0 for no limit (default: 5).
    #[serde(default = "default_max_requests_in_flight")]
    pub max_requests_in_flight: usize,

    /// Scrape deadline such as "5s" or "500ms", "0s" for none (default: "5s").
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Serve OpenMetrics to clients asking for it (default: true).
    #[serde(default = "default_open_metrics")]
    pub open_metrics: bool,

    /// Path of the `nft` binary (default: "nft").
    #[serde(default = "default_nft_binary")]
    pub nft_binary: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_addr() -> String {
    ":9923".to_string()
}

fn default_max_requests_in_flight() -> usize {
    5
}

fn default_timeout() -> String {
    "5s".to_string()
}

fn default_open_metrics() -> bool {
    true
}

fn default_nft_binary() -> String {
    "nft".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Scrape handling settings, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeSettings {
    /// `host:port` to bind; the host may be a name resolved when binding.
    pub listen: String,
    /// `None` when concurrent scrapes are not limited.
    pub max_in_flight: Option<usize>,
    /// `None` when scrapes have no deadline.
    pub timeout: Option<Duration>,
    pub open_metrics: bool,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            listen: "[::]:9923".to_string(),
            max_in_flight: Some(default_max_requests_in_flight()),
            timeout: Some(Duration::from_secs(5)),
            open_metrics: default_open_metrics(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file if any, then apply the process environment.
    ///
    /// Without an explicit path, [`DEFAULT_CONFIG_FILE`] is used when it
    /// exists in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_file(path) {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override settings from environment variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LISTENADDR") {
            self.listen_addr = value;
        }

        if let Some(value) = lookup("MAXREQUESTSINFLIGHT") {
            self.max_requests_in_flight = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "MAXREQUESTSINFLIGHT",
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup("TIMEOUT") {
            self.timeout = value;
        }

        if let Some(value) = lookup("OPENMETRICS") {
            let flag = value.trim().to_ascii_lowercase();
            self.open_metrics = match flag.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Env {
                        key: "OPENMETRICS",
                        value,
                    });
                }
            };
        }

        if let Some(value) = lookup("NFTBINARY") {
            self.nft_binary = value;
        }

        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve()?;

        if self.nft_binary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "NftBinary must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the scrape settings.
    pub fn resolve(&self) -> Result<ScrapeSettings, ConfigError> {
        let listen = parse_listen_addr(&self.listen_addr)?;

        let timeout = humantime::parse_duration(self.timeout.trim()).map_err(|e| {
            ConfigError::Validation(format!("Invalid timeout '{}': {}", self.timeout, e))
        })?;

        Ok(ScrapeSettings {
            listen,
            max_in_flight: Some(self.max_requests_in_flight).filter(|&n| n > 0),
            timeout: Some(timeout).filter(|t| !t.is_zero()),
            open_metrics: self.open_metrics,
        })
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_requests_in_flight: default_max_requests_in_flight(),
            timeout: default_timeout(),
            open_metrics: default_open_metrics(),
            nft_binary: default_nft_binary(),
            logging: LoggingConfig::default(),
        }
    }
}

/// The configuration file to read, if any.
pub fn config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.is_file().then_some(default)
        }
    }
}

/// Check a `host:port` listen address and normalize it for binding.
///
/// The host may be an IP literal (IPv6 in brackets) or a name. The host-less
/// `:port` form listens on every interface, IPv6 and IPv4 alike.
pub fn parse_listen_addr(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    let invalid = || ConfigError::Validation(format!("Invalid listen address: {}", addr));

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    if host.is_empty() {
        return Ok(format!("[::]:{}", port));
    }

    let bracketed = host.starts_with('[') && host.ends_with(']');
    if (host.contains(':') && !bracketed) || host.contains(char::is_whitespace) {
        return Err(invalid());
    }

    Ok(addr.to_string())
}
