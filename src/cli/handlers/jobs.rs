//! Jobs command handler
//!
//! One-shot job administration against the configured store. Results are
//! returned as JSON and printed to stdout.

use std::time::Duration;

use jiff::Timestamp;
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;

use crate::cli::parser::JobsCommand;
use crate::config::settings::Settings;
use crate::cron::{CronJobState, FlowSpec, ScheduleFlowArgs, spawn_completion_listener};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Handler for the jobs subcommands
pub struct JobsCommandHandler {
    state: AppState,
    /// How long `run` and `sweep` wait for the flows they started
    wait: Duration,
}

impl JobsCommandHandler {
    pub fn new(state: AppState, wait: Duration) -> Self {
        Self { state, wait }
    }

    /// Build the application state from settings and run one command.
    ///
    /// Flows started by `run` or `sweep` execute in this process, so the
    /// command waits for them and records their completion before returning.
    pub async fn execute(config: &Settings, command: &JobsCommand) -> AppResult<()> {
        config.validate()?;

        let (state, completions) = AppState::build(config).await?;
        let listener_shutdown = CancellationToken::new();
        let listener = spawn_completion_listener(
            state.manager.clone(),
            completions,
            listener_shutdown.clone(),
        );

        let handler = Self::new(state, config.scheduler.engine_timeout());
        let result = handler.dispatch(command, Timestamp::now()).await;

        handler.state.drain(handler.wait).await;
        listener_shutdown.cancel();
        listener.await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        let output = result?;
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    /// Run one command and return its JSON result
    pub async fn dispatch(&self, command: &JobsCommand, now: Timestamp) -> AppResult<JsonValue> {
        let manager = &self.state.manager;

        let output = match command {
            JobsCommand::List { offset, count } => {
                let (jobs, total) = manager.list_job_views(*offset, *count).await?;
                json!({ "total": total, "jobs": jobs })
            }
            JobsCommand::Get { id } => serde_json::to_value(manager.get_job_view(id).await?)?,
            JobsCommand::Create {
                flow,
                args,
                periodicity,
                lifetime,
                allow_overruns,
                description,
                enabled,
            } => {
                let schedule = ScheduleFlowArgs {
                    flow_spec: FlowSpec::new(flow.clone(), args.clone().unwrap_or_else(|| json!({}))),
                    periodicity: *periodicity,
                    lifetime: *lifetime,
                    allow_overruns: *allow_overruns,
                    description: description.clone(),
                };
                let state = if *enabled {
                    CronJobState::Enabled
                } else {
                    CronJobState::Disabled
                };
                let id = manager.create_job(schedule, state, now).await?;
                serde_json::to_value(manager.get_job_view(&id).await?)?
            }
            JobsCommand::Enable { id } => serde_json::to_value(manager.enable(id).await?)?,
            JobsCommand::Disable { id } => serde_json::to_value(manager.disable(id).await?)?,
            JobsCommand::Delete { id } => {
                manager.delete(id).await?;
                json!({ "deleted": id })
            }
            JobsCommand::Run { ids, force } => {
                let results = manager.run_once(ids, *force, now).await;
                let entries: Vec<JsonValue> = results
                    .into_iter()
                    .map(|(id, result)| match result {
                        Ok(outcome) => json!({ "id": id, "result": outcome }),
                        Err(e) => json!({ "id": id, "error": e.to_string() }),
                    })
                    .collect();
                JsonValue::Array(entries)
            }
            JobsCommand::Runs { id, offset, count } => {
                let (runs, total) = manager.list_runs(id, *offset, *count).await?;
                json!({ "total": total, "runs": runs })
            }
            JobsCommand::Sweep => serde_json::to_value(manager.sweep_due(now).await?)?,
        };

        Ok(output)
    }
}
