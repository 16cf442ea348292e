use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the database connection URI.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error occurred while reading a config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error occurred
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The connection URI environment variable is not set
    #[error("{0} is not set; a database connection URI is required")]
    MissingUrl(&'static str),

    /// The connection URI could not be parsed or uses an unsupported scheme
    #[error("invalid database connection URI: {details}")]
    InvalidUrl {
        /// What made the URI unusable
        details: String,
    },
}

/// Main configuration for the connection core
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Database connection URI
    pub url: String,
    /// Retry behavior tunables
    #[serde(default)]
    pub retry: RetryConfig,
    /// Driver timeout tunables
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Retry behavior tunables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per operation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling on the delay between retries, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether to randomize delays; off keeps the schedule deterministic
    #[serde(default)]
    pub jitter: bool,
}

/// Driver timeout tunables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimeoutConfig {
    /// TCP connect timeout, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on the whole handshake (name resolution, TCP, auth), in milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Timeout for an unresponsive established socket, in milliseconds
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_handshake_timeout_ms() -> u64 {
    5_000
}

const fn default_socket_timeout_ms() -> u64 {
    45_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    /// TCP connect timeout as a [`Duration`]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Handshake bound as a [`Duration`]
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Socket timeout as a [`Duration`]
    #[must_use]
    pub const fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Reads the connection URI from `DATABASE_URL` and validates it; all
    /// tunables take their defaults. A missing URI is a startup error, not a
    /// retriable one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url =
            env::var(DATABASE_URL_VAR).map_err(|_| ConfigError::MissingUrl(DATABASE_URL_VAR))?;
        validate_url(&url)?;
        Ok(Self {
            url,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        validate_url(&config.url)?;
        Ok(config)
    }
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        details: e.to_string(),
    })?;
    match parsed.scheme() {
        "postgres" | "postgresql" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            details: format!("unsupported scheme `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults_match_documented_values() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay_ms, 1_000);
        assert_eq!(retry.max_delay_ms, 10_000);
        assert!(!retry.jitter);
    }

    #[test]
    fn timeout_defaults_match_documented_values() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.connect_timeout(), Duration::from_secs(10));
        assert_eq!(timeouts.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(timeouts.socket_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            url = "postgres://app@localhost:5432/cafe"

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.timeouts.socket_timeout_ms, 45_000);
    }

    #[test]
    fn rejects_non_postgres_scheme() {
        let result = validate_url("mysql://root@localhost/db");
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn rejects_unparseable_url() {
        let result = validate_url("not a uri");
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }
}
