//! Configuration loading for link-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every section and field is optional and falls back to its default.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for link-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Message bus configuration.
    pub bus: BusConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:1025).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum accepted message length in bytes (default: 64 KiB).
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

/// Message bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Age in seconds after which an unclaimed envelope is purged (default: 1 day).
    #[serde(default = "default_envelope_ttl")]
    pub envelope_ttl_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum messages per identity per minute (default: 120).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum live connections per identity (default: 16).
    #[serde(default = "default_max_connections_per_identity")]
    pub max_connections_per_identity: usize,
    /// Maximum messages per second across all identities (default: 1000).
    #[serde(default = "default_global_messages_per_second")]
    pub global_messages_per_second: u32,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Header carrying the identity verified by the upstream auth layer.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Header carrying the caller's session tag.
    #[serde(default = "default_session_header")]
    pub session_header: String,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (default: info).
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:1025".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("links.db")
}

fn default_max_message_len() -> usize {
    64 * 1024 // 64 KiB
}

fn default_envelope_ttl() -> u64 {
    24 * 60 * 60 // 1 day in seconds
}

fn default_messages_per_minute() -> u32 {
    120
}

fn default_max_connections_per_identity() -> usize {
    16
}

fn default_global_messages_per_second() -> u32 {
    1000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_identity_header() -> String {
    "x-verified-email".to_string()
}

fn default_session_header() -> String {
    "x-session-tag".to_string()
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_message_len: default_max_message_len(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            envelope_ttl_secs: default_envelope_ttl(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            max_connections_per_identity: default_max_connections_per_identity(),
            global_messages_per_second: default_global_messages_per_second(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
            identity_header: default_identity_header(),
            session_header: default_session_header(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a limit
    /// that must be positive is zero.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that the rate limiters and cleanup timer cannot accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.messages_per_minute == 0 {
            return Err(ConfigError::Invalid("limits.messages_per_minute must be > 0"));
        }
        if self.limits.global_messages_per_second == 0 {
            return Err(ConfigError::Invalid(
                "limits.global_messages_per_second must be > 0",
            ));
        }
        if self.limits.max_connections_per_identity == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_connections_per_identity must be > 0",
            ));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(ConfigError::Invalid("cleanup.interval_secs must be > 0"));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
