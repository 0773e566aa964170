//! Configuration error types.

use std::path::PathBuf;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        /// Path that failed to read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Failed to write the configuration file
    #[error("failed to write config file {path}: {source}")]
    FileWrite {
        /// Path that failed to write
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialisation error
    #[error("failed to serialise TOML: {0}")]
    Serialise(#[from] toml::ser::Error),

    /// A value failed validation
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Dotted key path of the offending value
        key: &'static str,
        /// Why the value is rejected
        reason: String,
    },
}

impl ConfigError {
    /// Shorthand for an [`ConfigError::Invalid`] error.
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
