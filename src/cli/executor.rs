//! Command executor for dispatching CLI commands
//!
//! This module provides the main entry point for executing CLI commands
//! after parsing and configuration loading.

use super::handlers::{JobsCommandHandler, MigrateCommandHandler, ServeCommandHandler};
use super::parser::{Cli, Commands, JobsCommand};
use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};

/// Execute a CLI command with the given settings
///
/// No subcommand means `serve`.
///
/// # Errors
/// Returns errors from command handlers or validation failures
pub async fn execute_command(cli: &Cli, settings: Settings) -> AppResult<()> {
    validate_command_args(cli)?;

    match &cli.command {
        Some(Commands::Serve { dry_run, .. }) => {
            ServeCommandHandler::new(settings).execute(*dry_run).await
        }
        None => ServeCommandHandler::new(settings).execute(false).await,
        Some(Commands::Migrate { dry_run, rollback }) => {
            MigrateCommandHandler::new(settings)
                .execute(*dry_run, *rollback)
                .await
        }
        Some(Commands::Jobs { command }) => JobsCommandHandler::execute(&settings, command).await,
    }
}

/// Validate command arguments before execution
fn validate_command_args(cli: &Cli) -> AppResult<()> {
    if let Err(msg) = cli.validate() {
        return Err(AppError::Validation {
            field: "cli_arguments".to_string(),
            reason: msg,
        });
    }

    match &cli.command {
        Some(Commands::Migrate {
            rollback: Some(steps),
            ..
        }) if *steps > 50 => {
            eprintln!(
                "Warning: Rolling back {} migrations is a large operation. Consider using smaller steps.",
                steps
            );
        }
        Some(Commands::Jobs {
            command: JobsCommand::Run { force: true, ids },
        }) => {
            tracing::info!(count = ids.len(), "Forcing run of cron jobs");
        }
        _ => {}
    }

    Ok(())
}
