//! Error types for rebound-core configuration handling

use thiserror::Error;

/// Result type alias using rebound-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or validating retry configuration
///
/// Failures of retried operations never surface as this type; they are
/// reported through [`RetryError`](crate::retry::RetryError).
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration value or format
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid environment override
    #[error("Invalid value for {variable}: {value}")]
    InvalidEnvOverride { variable: String, value: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid environment override error
    pub fn invalid_env_override(variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidEnvOverride {
            variable: variable.into(),
            value: value.into(),
        }
    }
}
