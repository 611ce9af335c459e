use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::cron::CronError;

/// Utility for converting database errors into the cron error taxonomy.
///
/// The store adapter reports everything through `CronError`; this converter
/// decides which database failures are worth a retry.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    /// Converts a Diesel error to an appropriate `CronError` variant.
    ///
    /// # Arguments
    /// * `error` - The Diesel error to convert
    /// * `operation` - Description of the database operation that failed
    pub fn convert_diesel_error(error: DieselError, operation: &str) -> CronError {
        match error {
            DieselError::DatabaseError(kind, info) => {
                Self::convert_database_error(kind, info.message(), operation)
            }
            DieselError::NotFound => CronError::NotFound(operation.to_string()),
            DieselError::BrokenTransactionManager => {
                CronError::transient(format!("{operation}: broken transaction manager"))
            }
            other => CronError::Internal {
                source: anyhow::Error::from(other).context(operation.to_string()),
            },
        }
    }

    fn convert_database_error(kind: DatabaseErrorKind, message: &str, operation: &str) -> CronError {
        match kind {
            DatabaseErrorKind::UniqueViolation => {
                CronError::invalid(format!("{operation}: duplicate entry ({message})"))
            }
            DatabaseErrorKind::CheckViolation | DatabaseErrorKind::NotNullViolation => {
                CronError::invalid(format!("{operation}: {message}"))
            }
            DatabaseErrorKind::ForeignKeyViolation => {
                CronError::NotFound(format!("{operation}: referenced cron job is gone"))
            }
            DatabaseErrorKind::SerializationFailure => CronError::VersionConflict {
                id: operation.to_string(),
                expected: -1,
            },
            DatabaseErrorKind::ClosedConnection => {
                CronError::transient(format!("{operation}: connection closed"))
            }
            _ => CronError::Internal {
                source: anyhow::anyhow!("{operation}: {message}"),
            },
        }
    }
}

impl From<DieselError> for CronError {
    fn from(error: DieselError) -> Self {
        DatabaseErrorConverter::convert_diesel_error(error, "database operation")
    }
}
