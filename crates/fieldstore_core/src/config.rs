//! Runtime configuration for storage behavior.
//!
//! # Responsibility
//! - Hold the knobs callers may tune without code changes.
//! - Parse and validate JSON configuration documents.
//!
//! # Invariants
//! - A `StorageConfig` returned by `from_json` or `validate` is always usable.
//! - Defaults reproduce plain statement-by-statement stores.

use crate::model::ident::is_language_code;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Storage engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Wraps each multi-statement store in one repository transaction.
    pub transactional_store: bool,
    /// Language used when a translation has no value in the requested one.
    pub fallback_language_code: Option<String>,
    /// SQLite busy timeout applied when opening connections.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            transactional_store: false,
            fallback_language_code: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StorageConfig {
    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidBusyTimeout);
        }
        if let Some(code) = &self.fallback_language_code {
            if !is_language_code(code) {
                return Err(ConfigError::InvalidFallbackLanguage(code.clone()));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Configuration parse/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidBusyTimeout,
    InvalidFallbackLanguage(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid storage config: {err}"),
            Self::InvalidBusyTimeout => write!(f, "busy_timeout_ms must be greater than zero"),
            Self::InvalidFallbackLanguage(code) => {
                write!(f, "invalid fallback_language_code: `{code}`")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}
