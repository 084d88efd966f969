//! Configuration error surface.

use thiserror::Error;

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure loading or validating process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// A field failed validation.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
