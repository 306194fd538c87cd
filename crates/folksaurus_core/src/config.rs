//! Synchronizer configuration.
//!
//! # Responsibility
//! - Hold the tunables of resolution, refresh and logging.
//! - Load them from TOML with defaults for every missing key.
//!
//! # Invariants
//! - A loaded config has passed `SyncConfig::validate()`.

use crate::logging::default_log_level;
use crate::model::term::Taxonomy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Default bound of the slug-collision retry loop.
pub const DEFAULT_SLUG_RETRY_ATTEMPTS: u32 = 10;
/// Default age after which a stored term is fetched again.
pub const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse(message) => write!(f, "failed to parse config: {message}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Logging section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute log directory. Logging stays off when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Tunables of the term synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts made to find a free slug for a new local term.
    pub slug_retry_attempts: u32,
    /// Stored terms older than this are fetched again on display.
    pub refresh_interval_secs: i64,
    /// Taxonomy used when a synced term carries none.
    pub default_taxonomy: Taxonomy,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slug_retry_attempts: DEFAULT_SLUG_RETRY_ATTEMPTS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            default_taxonomy: Taxonomy::Category,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slug_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "slug_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.refresh_interval_secs < 0 {
            return Err(ConfigError::Invalid(format!(
                "refresh_interval_secs must not be negative, got {}",
                self.refresh_interval_secs
            )));
        }
        Ok(())
    }
}
