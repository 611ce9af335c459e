use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Errors surfaced by the cron job manager.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("Cron job not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The record changed between read and conditional write.
    #[error("Version conflict on cron job {id}: expected version {expected}")]
    VersionConflict { id: String, expected: i64 },

    /// Store or execution engine did not answer in time, or is unavailable.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl CronError {
    pub fn not_found(id: impl Into<String>) -> Self {
        CronError::NotFound(id.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CronError::InvalidArgument(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CronError::Transient(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CronError::VersionConflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CronError::Transient(_))
    }

    /// Whether retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict() || self.is_transient()
    }
}

impl From<serde_json::Error> for CronError {
    fn from(error: serde_json::Error) -> Self {
        CronError::Internal {
            source: anyhow::Error::from(error),
        }
    }
}

impl From<ValidationErrors> for CronError {
    fn from(errors: ValidationErrors) -> Self {
        let failures: Vec<String> = validation_failures(&errors)
            .into_iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        CronError::InvalidArgument(failures.join("; "))
    }
}

/// Every failed field as `(path, message)`, sorted by path. Nested structs
/// contribute dotted paths such as `flow_spec.name`.
pub(crate) fn validation_failures(errors: &ValidationErrors) -> Vec<(String, String)> {
    let mut failures = Vec::new();
    collect_failures(errors, None, &mut failures);
    failures.sort();
    failures
}

fn collect_failures(
    errors: &ValidationErrors,
    parent: Option<&str>,
    failures: &mut Vec<(String, String)>,
) {
    for (field, kind) in errors.errors() {
        let path = match parent {
            Some(parent) => format!("{parent}.{field}"),
            None => field.to_string(),
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                failures.extend(errs.iter().map(|e| {
                    let message = match &e.message {
                        Some(message) => message.to_string(),
                        None => e.code.to_string(),
                    };
                    (path.clone(), message)
                }));
            }
            ValidationErrorsKind::Struct(nested) => collect_failures(nested, Some(&path), failures),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_failures(nested, Some(&format!("{path}[{index}]")), failures);
                }
            }
        }
    }
}

impl From<tokio::time::error::Elapsed> for CronError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CronError::Transient("operation timed out".to_string())
    }
}

pub type CronResult<T> = Result<T, CronError>;
