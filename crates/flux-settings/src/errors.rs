//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON, or does not fit the settings schema.
    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse failure.
        source: serde_json::Error,
    },
    /// The compiled defaults could not be turned into a merge base.
    #[error("failed to serialize default settings: {0}")]
    Defaults(#[source] serde_json::Error),
    /// A setting was rejected by validation.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted camelCase path of the setting, e.g. `amqp.prefetch`.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    /// The setting that failed validation, if that is what went wrong.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
