//! Configuration validation logic
//!
//! Validation methods for every configuration section, checked once after
//! loading so that bad values fail at startup instead of mid-sweep.

use crate::config::error::ConfigError;
use crate::config::settings::{
    DatabaseConfig, LoggerSettings, SchedulerConfig, Settings, StoreBackend,
    StoreConfig,
};

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Validation Rules
    /// - URL must not be empty and must use a PostgreSQL scheme
    /// - Min and max connections must be greater than 0
    /// - Min connections must not exceed max connections
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required. Please specify a valid database connection string.",
            ));
        }

        if !self.is_valid_database_url() {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected format: postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections == 0 {
            return Err(ConfigError::validation(
                "database.min_connections",
                "Min connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError {
                field: "database.min_connections".to_string(),
                message: format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            });
        }

        Ok(())
    }

    fn is_valid_database_url(&self) -> bool {
        ["postgres://", "postgresql://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "store.request_timeout_ms",
                "Store request timeout must be greater than 0.",
            ));
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration
    ///
    /// # Validation Rules
    /// - Sweep interval, concurrency and engine timeout must be greater than 0
    /// - Backoff multiplier must be at least 1.0
    /// - Base retry delay must not exceed the maximum delay
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::validation(
                "scheduler.sweep_interval_secs",
                "Sweep interval must be greater than 0 seconds.",
            ));
        }

        if self.max_concurrent_starts == 0 {
            return Err(ConfigError::validation(
                "scheduler.max_concurrent_starts",
                "Max concurrent starts must be greater than 0.",
            ));
        }

        if self.engine_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "scheduler.engine_timeout_ms",
                "Engine timeout must be greater than 0.",
            ));
        }

        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError {
                field: "scheduler.retry_backoff_multiplier".to_string(),
                message: format!(
                    "Backoff multiplier must be at least 1.0, got {}.",
                    self.retry_backoff_multiplier
                ),
            });
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::ValidationError {
                field: "scheduler.retry_base_delay_ms".to_string(),
                message: format!(
                    "Base retry delay ({}ms) cannot exceed max retry delay ({}ms).",
                    self.retry_base_delay_ms, self.retry_max_delay_ms
                ),
            });
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Checked by building the runtime logger configuration, so the rules
    /// live in one place.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clone().into_logger_config().map(|_| ())
    }
}

impl Settings {
    /// Validate all configuration settings
    ///
    /// The database section is only checked when the postgres store backend
    /// is selected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Postgres {
            self.database.validate()?;
        }
        self.store.validate()?;
        self.scheduler.validate()?;
        self.logger.validate()?;
        Ok(())
    }
}
