//! Serve command handler
//!
//! Runs the periodic sweep and the completion listener until a shutdown
//! signal arrives, or only validates configuration on dry-run.

use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::StoreBackend;
use crate::config::settings::Settings;
use crate::cron::{SweepScheduler, spawn_completion_listener};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// How long running flows get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Handler for the serve command
pub struct ServeCommandHandler {
    config: Settings,
}

impl ServeCommandHandler {
    /// Create a new serve command handler
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Execute the serve command with optional dry-run support
    ///
    /// # Errors
    /// - Configuration validation errors
    /// - Store or scheduler startup errors (if not dry-run)
    pub async fn execute(&self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            self.validate_only()
        } else {
            self.run().await
        }
    }

    /// Validate configuration without starting the scheduler
    pub fn validate_only(&self) -> AppResult<()> {
        self.validate_configuration()?;

        println!("✓ Configuration is valid");
        match self.config.store.backend {
            StoreBackend::Memory => {
                println!("✓ Store backend: memory (jobs are lost on exit)");
            }
            StoreBackend::Postgres => {
                println!("✓ Store backend: postgres");
                println!("✓ Database URL is configured");
            }
        }
        if self.config.scheduler.enabled {
            println!(
                "✓ Sweep every {}s, up to {} concurrent starts",
                self.config.scheduler.sweep_interval_secs,
                self.config.scheduler.max_concurrent_starts
            );
        } else {
            println!("✓ Periodic sweep is disabled");
        }
        println!("✓ Logger configuration is valid");

        println!("Dry run completed successfully - configuration is ready for deployment");
        Ok(())
    }

    /// Run until Ctrl+C or SIGTERM
    async fn run(&self) -> AppResult<()> {
        self.validate_configuration()?;

        let (state, completions) = AppState::build(&self.config).await?;
        let listener_shutdown = CancellationToken::new();
        let listener = spawn_completion_listener(
            state.manager.clone(),
            completions,
            listener_shutdown.clone(),
        );

        let scheduler = if self.config.scheduler.enabled {
            let scheduler =
                SweepScheduler::new(state.manager.clone(), &self.config.scheduler).await?;
            scheduler.start().await?;
            Some(scheduler)
        } else {
            tracing::warn!("Periodic sweep disabled; only recording flow completions");
            None
        };

        tracing::info!(
            name = %self.config.application.name,
            version = %self.config.application.version,
            "flowcron started"
        );

        shutdown_signal().await;

        if let Some(scheduler) = &scheduler {
            scheduler.stop().await?;
        }
        state.drain(SHUTDOWN_GRACE).await;
        listener_shutdown.cancel();
        listener.await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        tracing::info!("Shutdown complete");
        Ok(())
    }

    fn validate_configuration(&self) -> AppResult<()> {
        self.config.validate().map_err(|e| e.into())
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
