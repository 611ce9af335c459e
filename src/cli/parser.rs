//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use clap::{Parser, Subcommand, ValueEnum};
use jiff::SignedDuration;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

use crate::build;

/// Periodic flow scheduler with a shared job store
#[derive(Parser, Debug)]
#[command(name = "flowcron")]
#[command(about = "Periodic flow scheduler with a shared job store")]
#[command(long_about = "
Flowcron keeps a set of cron jobs, each of which starts a named flow on a
fixed period. Jobs live in a shared store so that several schedulers can
sweep the same jobs without starting a job twice.

EXAMPLES:
    # Run the periodic sweep until interrupted
    flowcron serve

    # Check configuration without starting the scheduler
    flowcron serve --dry-run

    # Create a job that starts the noop flow every 10 minutes
    flowcron jobs create --flow noop --periodicity 10m --enabled

    # List jobs with their health signal
    flowcron jobs list

    # Start a job now, even if it is not due
    flowcron jobs run noop_1a2b3c4d --force

    # Apply database migrations for the postgres store
    flowcron migrate

For more information about configuration options, see config/default.toml.
")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load a single TOML file instead of the layered config directory.
    /// Environment variables prefixed with FLOWCRON_ still apply on top.
    /// The file must exist and be readable.
    ///
    /// Example: --config /etc/flowcron/production.toml
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which {environment}.toml overlay is loaded from the config
    /// directory. Overrides FLOWCRON_APP_ENV.
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable verbose logging
    ///
    /// Cannot be used with --quiet.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Cannot be used with --verbose.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the periodic sweep (default)
    ///
    /// Starts due jobs on every sweep tick and records flow completions
    /// until Ctrl+C or SIGTERM.
    ///
    /// Examples:
    ///   flowcron serve               # Start with defaults
    ///   flowcron serve --dry-run     # Validate config without starting
    Serve {
        /// Log level override
        ///
        /// Overrides both configuration file settings and the global
        /// --verbose/--quiet flags.
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,

        /// Validate configuration and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Database migration operations
    ///
    /// Manage the schema of the postgres job store.
    ///
    /// Examples:
    ///   flowcron migrate                    # Apply all pending migrations
    ///   flowcron migrate --dry-run          # Show pending migrations without applying
    ///   flowcron migrate --rollback 3       # Rollback the last 3 migrations
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback (1-100)
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },
    /// Administer cron jobs
    ///
    /// Results are printed as JSON.
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
}

/// Job administration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum JobsCommand {
    /// List jobs ordered by id, with their failing flag
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum number of jobs; 0 lists everything
        #[arg(long, default_value_t = 0)]
        count: usize,
    },
    /// Show one job
    Get { id: String },
    /// Create a job
    ///
    /// Durations accept friendly ("10m", "1h 30m") or ISO 8601 ("PT10M")
    /// notation.
    Create {
        /// Registered flow name
        #[arg(long)]
        flow: String,

        /// Flow arguments as a JSON object
        #[arg(long, value_name = "JSON", value_parser = super::validation::validate_flow_args)]
        args: Option<JsonValue>,

        /// Minimum time between run starts
        #[arg(long, value_name = "DURATION", value_parser = super::validation::validate_duration)]
        periodicity: SignedDuration,

        /// Maximum runtime handed to the execution engine
        #[arg(long, value_name = "DURATION", value_parser = super::validation::validate_duration)]
        lifetime: Option<SignedDuration>,

        /// Start new runs while an earlier run is still outstanding
        #[arg(long)]
        allow_overruns: bool,

        #[arg(long, default_value = "")]
        description: String,

        /// Create the job ENABLED instead of DISABLED
        #[arg(long)]
        enabled: bool,
    },
    /// Enable a job
    Enable { id: String },
    /// Disable a job
    Disable { id: String },
    /// Delete a job and its run history
    Delete { id: String },
    /// Start jobs now if they are due
    Run {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Start even if not due or an earlier run is outstanding
        #[arg(long)]
        force: bool,
    },
    /// Show the run history of a job, newest first
    Runs {
        id: String,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum number of runs; 0 lists everything
        #[arg(long, default_value_t = 0)]
        count: usize,
    },
    /// Run one sweep over all jobs and exit
    Sweep,
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

/// Log level options
#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn", alias = "warning")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl Cli {
    /// Validate argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if let Some(Commands::Migrate { dry_run, rollback }) = &self.command
            && *dry_run
            && rollback.is_some()
        {
            return Err("Cannot use --dry-run and --rollback together".to_string());
        }

        if let Some(Commands::Jobs {
            command: JobsCommand::Run { ids, .. },
        }) = &self.command
            && ids.iter().any(|id| id.trim().is_empty())
        {
            return Err("Job ids cannot be empty".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use --verbose and --quiet together".to_string());
        }

        Ok(())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Debug => "debug".to_string(),
            LogLevel::Trace => "trace".to_string(),
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
