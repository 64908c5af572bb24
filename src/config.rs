//! Configuration file parsing
//!
//! Reads shadow-migrate.toml configuration files. The only required option
//! is `dialect`; everything else has a production default tuned for large
//! tables behind a live write load.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// The SQL dialect a database handle is bound to.
///
/// Parsing is strict: anything but `postgres` or `mysql` fails at the
/// config boundary, before any database work happens.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Deserialize,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Mysql,
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// SQL dialect of the target database. Required.
    pub dialect: Dialect,

    /// Rows per backfill chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Seconds slept between chunks (cooperative backpressure).
    #[serde(default = "default_throttle")]
    pub throttle: f64,

    /// Trigger names are truncated to this many bytes.
    #[serde(default = "default_max_length_name")]
    pub max_length_name: usize,

    /// MySQL rename swap: attempts before giving up.
    #[serde(default = "default_max_rename_retries")]
    pub max_rename_retries: u32,

    /// MySQL rename swap: seconds between attempts.
    #[serde(default = "default_retry_sleep_time")]
    pub retry_sleep_time: u64,
}

fn default_chunk_size() -> u64 {
    10_000
}

fn default_throttle() -> f64 {
    0.1
}

fn default_max_length_name() -> usize {
    60
}

fn default_max_rename_retries() -> u32 {
    10
}

fn default_retry_sleep_time() -> u64 {
    10
}

impl Config {
    /// A configuration with the production defaults for one dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            chunk_size: default_chunk_size(),
            throttle: default_throttle(),
            max_length_name: default_max_length_name(),
            max_rename_retries: default_max_rename_retries(),
            retry_sleep_time: default_retry_sleep_time(),
        }
    }

    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if !self.throttle.is_finite() || self.throttle < 0.0 {
            return Err(ConfigError::Validation(format!(
                "throttle must be a non-negative number of seconds, got {}",
                self.throttle
            )));
        }
        if self.max_length_name == 0 {
            return Err(ConfigError::Validation(
                "max_length_name must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn throttle_duration(&self) -> Duration {
        Duration::from_secs_f64(self.throttle)
    }

    pub fn retry_sleep_duration(&self) -> Duration {
        Duration::from_secs(self.retry_sleep_time)
    }
}
