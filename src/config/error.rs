//! Errors raised while loading and checking settings

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required configuration file is missing: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The merged sources do not deserialize into `Settings`
    #[error("Cannot read settings: {0}")]
    ParseError(String),

    #[error("Invalid setting {field}: {message}")]
    ValidationError { field: String, message: String },

    /// `FLOWCRON_APP_ENV` or `--env` named an environment we do not know
    #[error(
        "Unknown environment '{0}'. Valid values are: development, test, staging, production"
    )]
    UnknownEnvironment(String),

    /// Two sources were given that cannot be combined
    #[error("Conflicting configuration sources: {0}")]
    ConflictingSources(String),

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    /// Shorthand for a failed field check; `field` is the dotted settings path
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}
