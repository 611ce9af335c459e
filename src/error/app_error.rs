use thiserror::Error;

use crate::config::error::ConfigError;
use crate::cron::CronError;
use crate::cron::error::validation_failures;

/// Application-wide error type for everything outside the scheduling core.
///
/// The cron manager reports through `CronError`; command handlers, wiring
/// and configuration code lift those into `AppError` with the same meaning.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error with entity, field, and value information
    #[error("Resource not found: {entity} with {field}={value}")]
    NotFound {
        entity: String,
        field: String,
        value: String,
    },

    /// Validation error with field-specific details
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Bad request error with descriptive message
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Concurrent modification that exhausted its retries
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// A dependency did not answer in time
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Database operation error with operation context
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error with key information
    #[error("Configuration error: {key}")]
    Configuration {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("Connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

impl From<CronError> for AppError {
    fn from(error: CronError) -> Self {
        match error {
            CronError::NotFound(value) => AppError::NotFound {
                entity: "CronJob".to_string(),
                field: "id".to_string(),
                value,
            },
            CronError::InvalidArgument(message) => AppError::BadRequest { message },
            conflict @ CronError::VersionConflict { .. } => AppError::Conflict {
                message: conflict.to_string(),
            },
            CronError::Transient(message) => AppError::Unavailable { message },
            CronError::Internal { source } => AppError::Internal { source },
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::ValidationError { field, message } => AppError::Validation {
                field,
                reason: message,
            },
            other => AppError::Configuration {
                key: "settings".to_string(),
                source: anyhow::Error::from(other),
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let failures = validation_failures(&errors);
        let mut fields: Vec<&str> = failures.iter().map(|(field, _)| field.as_str()).collect();
        fields.dedup();
        let reasons: Vec<String> = failures
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        AppError::Validation {
            field: fields.join(","),
            reason: reasons.join("; "),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(error: diesel::result::Error) -> Self {
        AppError::from(CronError::from(error))
    }
}

impl<E> From<bb8::RunError<E>> for AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: bb8::RunError<E>) -> Self {
        AppError::ConnectionPool {
            source: anyhow::Error::from(error),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::BadRequest {
            message: format!("Invalid JSON: {error}"),
        }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
