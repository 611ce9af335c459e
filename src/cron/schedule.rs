//! Scheduling Decision Engine.

use jiff::Timestamp;
use serde::Serialize;

use crate::cron::error::CronResult;
use crate::cron::models::CronJob;
use crate::cron::store::JobStore;
use crate::flows::FlowEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NotDue,
    OverrunPrevented,
    /// Another scheduler claimed the job first.
    Claimed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "disabled"),
            SkipReason::NotDue => write!(f, "not due"),
            SkipReason::OverrunPrevented => write!(f, "overrun prevented"),
            SkipReason::Claimed => write!(f, "claimed by another scheduler"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip(SkipReason),
}

/// Whether `job` has reached its next run time at `now`.
pub fn is_due(job: &CronJob, now: Timestamp) -> bool {
    match job.last_run_time {
        None => true,
        Some(last) => now.duration_since(last) >= job.periodicity,
    }
}

/// Decide whether a new run of `job` should start at `now`.
///
/// The engine and the run history are consulted only for jobs that forbid
/// overruns and are due.
pub async fn should_run(
    job: &CronJob,
    now: Timestamp,
    engine: &dyn FlowEngine,
    store: &dyn JobStore,
) -> CronResult<Decision> {
    if !job.is_enabled() {
        return Ok(Decision::Skip(SkipReason::Disabled));
    }
    if job.last_run_time.is_none() {
        return Ok(Decision::Run);
    }
    if !is_due(job, now) {
        return Ok(Decision::Skip(SkipReason::NotDue));
    }
    if !job.allow_overruns && previous_run_outstanding(job, now, engine, store).await? {
        return Ok(Decision::Skip(SkipReason::OverrunPrevented));
    }
    Ok(Decision::Run)
}

/// The local engine only knows the flows it started itself. A flow started
/// by another scheduler sharing the store, or one whose id was never
/// recorded on the job, is found through the latest run record instead.
async fn previous_run_outstanding(
    job: &CronJob,
    now: Timestamp,
    engine: &dyn FlowEngine,
    store: &dyn JobStore,
) -> CronResult<bool> {
    if let Some(flow_id) = &job.current_run_id
        && engine.is_outstanding(flow_id).await?
    {
        return Ok(true);
    }
    if engine.has_outstanding_for_job(&job.id).await? {
        return Ok(true);
    }
    let (latest, _) = store.list_runs(&job.id, 0, 1).await?;
    Ok(latest
        .first()
        .is_some_and(|run| run.may_be_running(job.lifetime, now)))
}
