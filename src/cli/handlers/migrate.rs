//! Migrate command handler
//!
//! Applies, previews or rolls back the postgres job store schema.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::MigrationHarness;

use crate::config::StoreBackend;
use crate::config::settings::Settings;
use crate::db::{MIGRATIONS, run_pending_migrations};
use crate::error::{AppError, AppResult};

/// Handler for the migrate command
pub struct MigrateCommandHandler {
    config: Settings,
}

impl MigrateCommandHandler {
    /// Create a new migrate command handler
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Execute the migrate command with dry-run and rollback support
    ///
    /// # Arguments
    /// * `dry_run` - If true, shows pending migrations without applying them
    /// * `rollback` - Optional number of migrations to rollback
    ///
    /// # Errors
    /// - Database connection errors
    /// - Migration execution errors
    /// - Configuration validation errors
    pub async fn execute(&self, dry_run: bool, rollback: Option<u32>) -> AppResult<()> {
        if let Some(0) = rollback {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: "Number of rollback steps must be greater than 0".to_string(),
            });
        }

        self.config.database.validate()?;

        if self.config.store.backend == StoreBackend::Memory {
            tracing::warn!("store.backend is memory; the migrated schema will not be used");
        }

        if dry_run {
            self.show_pending_migrations().await
        } else if let Some(steps) = rollback {
            self.rollback_migrations(steps).await
        } else {
            self.run_migrations().await
        }
    }

    async fn show_pending_migrations(&self) -> AppResult<()> {
        println!("Checking for pending migrations...");

        let database_url = self.config.database.url.clone();
        let pending: Vec<String> = blocking(move || {
            let mut conn = establish(&database_url, "establish connection for migration check")?;
            let pending = conn
                .pending_migrations(MIGRATIONS)
                .map_err(|e| migration_error("check pending migrations", e))?;
            Ok(pending.iter().map(|m| m.name().to_string()).collect())
        })
        .await?;

        if pending.is_empty() {
            println!("✓ No pending migrations found - database is up to date");
        } else {
            println!("Found {} pending migration(s):", pending.len());
            for name in &pending {
                println!("  - {}", name);
            }
            println!("\nRun without --dry-run to apply these migrations");
        }

        Ok(())
    }

    async fn run_migrations(&self) -> AppResult<()> {
        println!("Running database migrations...");

        let applied = run_pending_migrations(&self.config.database.url).await?;

        if applied.is_empty() {
            println!("✓ No migrations to apply - database is already up to date");
        } else {
            println!("✓ Applied {} migration(s):", applied.len());
            for migration in &applied {
                println!("  - {}", migration);
            }
            println!("Database migration completed successfully");
        }

        Ok(())
    }

    async fn rollback_migrations(&self, steps: u32) -> AppResult<()> {
        println!("Rolling back {} migration(s)...", steps);

        let database_url = self.config.database.url.clone();
        let reverted: Vec<String> = blocking(move || {
            let mut conn = establish(&database_url, "establish connection for rollback")?;

            let applied = conn
                .applied_migrations()
                .map_err(|e| migration_error("get applied migrations", e))?;

            if applied.len() < steps as usize {
                return Err(AppError::Validation {
                    field: "rollback_steps".to_string(),
                    reason: format!(
                        "Cannot rollback {} migrations - only {} applied migrations available",
                        steps,
                        applied.len()
                    ),
                });
            }

            let mut reverted = Vec::with_capacity(steps as usize);
            for _ in 0..steps {
                let version = conn
                    .revert_last_migration(MIGRATIONS)
                    .map_err(|e| migration_error("revert migration", e))?;
                reverted.push(version.to_string());
            }
            Ok(reverted)
        })
        .await?;

        println!("✓ Rolled back {} migration(s):", reverted.len());
        for version in &reverted {
            println!("  - {}", version);
        }
        println!("Migration rollback completed successfully");

        Ok(())
    }
}

/// Migrations use a synchronous connection, kept off the async runtime.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?
}

fn establish(database_url: &str, operation: &str) -> AppResult<PgConnection> {
    PgConnection::establish(database_url).map_err(|e| AppError::Database {
        operation: operation.to_string(),
        source: anyhow::anyhow!("Connection error: {}", e),
    })
}

fn migration_error(
    operation: &str,
    error: Box<dyn std::error::Error + Send + Sync>,
) -> AppError {
    AppError::Database {
        operation: operation.to_string(),
        source: anyhow::anyhow!("Migration error: {}", error),
    }
}
