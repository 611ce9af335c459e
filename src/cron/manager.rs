//! Cron Manager: the public face of the scheduling core.
//!
//! Every time-dependent operation takes `now` from the caller so that a
//! whole sweep evaluates all jobs against the same instant.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use jiff::Timestamp;
use serde::Serialize;
use tracing::Instrument;

use crate::config::SchedulerConfig;
use crate::cron::error::{CronError, CronResult};
use crate::cron::health::FailureClassifier;
use crate::cron::lifecycle::Lifecycle;
use crate::cron::models::{
    CronJob, CronJobRun, CronJobState, CronJobView, RunStatus, ScheduleFlowArgs,
};
use crate::cron::retry::RetryPolicy;
use crate::cron::schedule::{Decision, SkipReason, should_run};
use crate::cron::store::JobStore;
use crate::flows::{FlowEngine, FlowTypeRegistry};

/// Result of asking for one job to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Started { flow_id: String },
    Skipped { reason: SkipReason },
}

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub started: usize,
    pub skipped: usize,
    /// Jobs claimed by a concurrent scheduler between read and write.
    pub conflicts: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct CronManager {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn FlowEngine>,
    lifecycle: Lifecycle,
    classifier: FailureClassifier,
    retry: RetryPolicy,
    force_requires_enabled: bool,
    max_concurrent_starts: usize,
    engine_timeout: Duration,
}

impl CronManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn FlowEngine>,
        flow_types: Arc<dyn FlowTypeRegistry>,
        config: &SchedulerConfig,
    ) -> Self {
        let retry = RetryPolicy::from(config);
        Self {
            lifecycle: Lifecycle::new(Arc::clone(&store), flow_types, retry),
            classifier: FailureClassifier::new(Arc::clone(&store)),
            store,
            engine,
            retry,
            force_requires_enabled: config.force_requires_enabled,
            max_concurrent_starts: config.max_concurrent_starts.max(1),
            engine_timeout: config.engine_timeout(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Jobs ordered by id. `count = 0` means everything from `offset`.
    pub async fn list_jobs(&self, offset: usize, count: usize) -> CronResult<(Vec<CronJob>, usize)> {
        self.retry
            .retry_transient("list jobs", || self.store.list(offset, count))
            .await
    }

    pub async fn get_job(&self, id: &str) -> CronResult<CronJob> {
        Self::check_id(id)?;
        self.retry
            .retry_transient("get job", || self.store.get(id))
            .await
    }

    pub async fn get_job_view(&self, id: &str) -> CronResult<CronJobView> {
        let job = self.get_job(id).await?;
        let is_failing = self.classifier.is_failing(&job.id).await?;
        Ok(CronJobView { job, is_failing })
    }

    pub async fn list_job_views(
        &self,
        offset: usize,
        count: usize,
    ) -> CronResult<(Vec<CronJobView>, usize)> {
        let (jobs, total) = self.list_jobs(offset, count).await?;
        let mut views = Vec::with_capacity(jobs.len());
        for job in jobs {
            let is_failing = match self.classifier.is_failing(&job.id).await {
                Ok(failing) => failing,
                // Deleted after the listing snapshot was taken.
                Err(CronError::NotFound(_)) => false,
                Err(e) => return Err(e),
            };
            views.push(CronJobView { job, is_failing });
        }
        Ok((views, total))
    }

    pub async fn list_runs(
        &self,
        job_id: &str,
        offset: usize,
        count: usize,
    ) -> CronResult<(Vec<CronJobRun>, usize)> {
        Self::check_id(job_id)?;
        self.retry
            .retry_transient("list runs", || self.store.list_runs(job_id, offset, count))
            .await
    }

    pub async fn get_run(&self, job_id: &str, flow_id: &str) -> CronResult<CronJobRun> {
        Self::check_id(job_id)?;
        self.retry
            .retry_transient("get run", || self.store.get_run(job_id, flow_id))
            .await
    }

    pub async fn is_failing(&self, job_id: &str) -> CronResult<bool> {
        self.classifier.is_failing(job_id).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a job in the DISABLED state; it runs only after `enable`.
    pub async fn schedule_flow(&self, args: ScheduleFlowArgs, now: Timestamp) -> CronResult<String> {
        self.lifecycle.create(args, CronJobState::Disabled, now).await
    }

    pub async fn create_job(
        &self,
        args: ScheduleFlowArgs,
        initial_state: CronJobState,
        now: Timestamp,
    ) -> CronResult<String> {
        self.lifecycle.create(args, initial_state, now).await
    }

    pub async fn enable(&self, id: &str) -> CronResult<CronJob> {
        self.lifecycle.enable(id).await
    }

    pub async fn disable(&self, id: &str) -> CronResult<CronJob> {
        self.lifecycle.disable(id).await
    }

    pub async fn set_state(&self, id: &str, state: CronJobState) -> CronResult<CronJob> {
        self.lifecycle.set_state(id, state).await
    }

    pub async fn delete(&self, id: &str) -> CronResult<()> {
        self.lifecycle.delete(id).await
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    /// Try to start each job in `ids`. One failing id never stops the rest.
    pub async fn run_once(
        &self,
        ids: &[String],
        force: bool,
        now: Timestamp,
    ) -> Vec<(String, CronResult<RunOutcome>)> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = match self.get_job(id).await {
                Ok(job) => self.run_job(job, now, force).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::error!(job_id = %id, force, error = %e, "Run request failed");
            }
            results.push((id.clone(), result));
        }
        results
    }

    /// Evaluate every enabled job against `now` and start the due ones.
    pub async fn sweep_due(&self, now: Timestamp) -> CronResult<SweepSummary> {
        let span = tracing::info_span!("sweep", %now);
        self.sweep_inner(now).instrument(span).await
    }

    async fn sweep_inner(&self, now: Timestamp) -> CronResult<SweepSummary> {
        let (jobs, _) = self.list_jobs(0, 0).await?;
        let mut summary = SweepSummary::default();

        let (enabled, disabled): (Vec<CronJob>, Vec<CronJob>) =
            jobs.into_iter().partition(CronJob::is_enabled);
        summary.skipped += disabled.len();

        let results: Vec<(String, CronResult<RunOutcome>)> = stream::iter(enabled)
            .map(|job| async move {
                let id = job.id.clone();
                (id, self.run_job(job, now, false).await)
            })
            .buffer_unordered(self.max_concurrent_starts)
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(RunOutcome::Started { .. }) => summary.started += 1,
                Ok(RunOutcome::Skipped {
                    reason: SkipReason::Claimed,
                }) => summary.conflicts += 1,
                Ok(RunOutcome::Skipped { .. }) => summary.skipped += 1,
                // Deleted since the listing.
                Err(CronError::NotFound(_)) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Failed to start cron job");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            started = summary.started,
            skipped = summary.skipped,
            conflicts = summary.conflicts,
            failed = summary.failed,
            "Sweep finished"
        );
        Ok(summary)
    }

    /// Decide and, if due, start one job. Only forced runs retry after
    /// losing a race; everywhere else a conflict means another scheduler
    /// took the job.
    async fn run_job(&self, mut job: CronJob, now: Timestamp, force: bool) -> CronResult<RunOutcome> {
        let mut attempt = 0;
        loop {
            if let Some(reason) = self.skip_reason(&job, now, force).await? {
                tracing::debug!(job_id = %job.id, %reason, "Cron job skipped");
                return Ok(RunOutcome::Skipped { reason });
            }

            match self.spawn_start(job.clone(), now).await {
                Err(e) if e.is_conflict() && force && attempt < self.retry.conflict_retries => {
                    tracing::debug!(job_id = %job.id, attempt, "Forced run lost a race, re-reading");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    job = self.get_job(&job.id).await?;
                }
                Err(e) if e.is_conflict() && force => {
                    return Err(CronError::transient(format!(
                        "Gave up starting cron job {} after {} conflicts",
                        job.id,
                        attempt + 1
                    )));
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(job_id = %job.id, "Cron job claimed by another scheduler");
                    return Ok(RunOutcome::Skipped {
                        reason: SkipReason::Claimed,
                    });
                }
                other => return other,
            }
        }
    }

    async fn skip_reason(
        &self,
        job: &CronJob,
        now: Timestamp,
        force: bool,
    ) -> CronResult<Option<SkipReason>> {
        if force {
            if self.force_requires_enabled && !job.is_enabled() {
                return Ok(Some(SkipReason::Disabled));
            }
            return Ok(None);
        }

        let decision = self
            .retry
            .retry_transient("evaluate job", || async {
                tokio::time::timeout(
                    self.engine_timeout,
                    should_run(job, now, self.engine.as_ref(), self.store.as_ref()),
                )
                .await
                    .map_err(CronError::from)
                    .and_then(|decision| decision)
            })
            .await?;
        Ok(match decision {
            Decision::Run => None,
            Decision::Skip(reason) => Some(reason),
        })
    }

    /// Run the claim/start/record sequence on its own task so that it
    /// completes even if the caller stops waiting.
    async fn spawn_start(&self, job: CronJob, now: Timestamp) -> CronResult<RunOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.claim_and_start(job, now).await })
            .await
            .map_err(|e| CronError::Internal {
                source: anyhow::Error::from(e),
            })?
    }

    async fn claim_and_start(&self, job: CronJob, now: Timestamp) -> CronResult<RunOutcome> {
        let id = job.id.as_str();

        // Claim the period before starting anything: last_run_time never
        // moves backwards and the previous run id is cleared.
        let claimed = self
            .retry
            .retry_transient("claim job", || {
                self.store.conditional_update(
                    id,
                    job.version,
                    Box::new(move |j: &mut CronJob| {
                        j.last_run_time = Some(j.last_run_time.map_or(now, |last| last.max(now)));
                        j.current_run_id = None;
                    }),
                )
            })
            .await?;

        // Never retried: a timed-out start may still have started the flow.
        let started = tokio::time::timeout(
            self.engine_timeout,
            self.engine
                .start_flow(id, &claimed.flow_spec, claimed.lifetime),
        )
        .await
        .map_err(CronError::from)
        .and_then(|result| result);

        let flow_id = match started {
            Ok(flow_id) => flow_id,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Execution engine refused to start flow");
                return Err(e);
            }
        };

        tracing::info!(
            job_id = %id,
            flow_id = %flow_id,
            flow = %claimed.flow_spec.name,
            "Cron job run started"
        );

        // The PENDING run goes in first: it is what keeps other schedulers
        // from overrunning this flow if recording the id on the job fails.
        let run = CronJobRun::pending(id, flow_id.as_str(), now);
        let appended = self
            .retry
            .retry_transient("append run", || self.store.append_run(run.clone()))
            .await;
        if let Err(e) = &appended {
            tracing::error!(job_id = %id, flow_id = %flow_id, error = %e, "Failed to append run history");
        }

        if let Err(e) = self.record_current_run(&claimed, &flow_id).await {
            tracing::error!(job_id = %id, flow_id = %flow_id, error = %e, "Failed to record current run");
            if appended.is_err() {
                return Err(CronError::transient(format!(
                    "Flow {flow_id} of cron job {id} started but could not be recorded: {e}"
                )));
            }
        }

        Ok(RunOutcome::Started { flow_id })
    }

    /// Store `flow_id` as the job's current run, as long as no later claim
    /// has replaced ours.
    async fn record_current_run(&self, claimed: &CronJob, flow_id: &str) -> CronResult<()> {
        let id = claimed.id.as_str();
        let mut version = claimed.version;

        for attempt in 0..=self.retry.conflict_retries {
            let result = self
                .retry
                .retry_transient("record current run", || {
                    let flow_id = flow_id.to_string();
                    self.store.conditional_update(
                        id,
                        version,
                        Box::new(move |j: &mut CronJob| j.current_run_id = Some(flow_id)),
                    )
                })
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    let current = self.get_job(id).await?;
                    if current.last_run_time != claimed.last_run_time
                        || current.current_run_id.is_some()
                    {
                        tracing::debug!(job_id = %id, "Job was claimed again before run was recorded");
                        return Ok(());
                    }
                    tracing::debug!(job_id = %id, attempt, "Recording run lost a race, retrying");
                    version = current.version;
                }
                Err(e) => return Err(e),
            }
        }

        Err(CronError::transient(format!(
            "Gave up recording current run of cron job {id} after repeated conflicts"
        )))
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Persist the final status of a run reported by the execution engine.
    pub async fn report_completion(
        &self,
        job_id: &str,
        flow_id: &str,
        status: RunStatus,
        finished_at: Timestamp,
    ) -> CronResult<CronJobRun> {
        if !status.is_final() {
            return Err(CronError::invalid(format!(
                "Completion status must be final, got {status}"
            )));
        }
        let run = self
            .retry
            .retry_transient("finalize run", || {
                self.store.finalize_run(job_id, flow_id, status, finished_at)
            })
            .await?;
        tracing::info!(%job_id, %flow_id, %status, "Cron job run finished");
        Ok(run)
    }

    fn check_id(id: &str) -> CronResult<()> {
        if id.trim().is_empty() {
            Err(CronError::invalid("Cron job id must not be empty"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;
    use jiff::SignedDuration;
    use serde_json::json;

    use super::*;
    use crate::cron::models::FlowSpec;
    use crate::cron::store::MemoryJobStore;

    /// Engine double: every start succeeds unless refused, and flows stay
    /// outstanding until `finish` is called.
    #[derive(Default)]
    struct ScriptedEngine {
        next_id: AtomicU64,
        refuse: AtomicBool,
        started: Mutex<Vec<(String, String)>>,
        outstanding: Mutex<HashSet<String>>,
    }

    impl ScriptedEngine {
        fn starts(&self) -> usize {
            self.started.lock().unwrap().len()
        }

        fn finish(&self, flow_id: &str) {
            self.outstanding.lock().unwrap().remove(flow_id);
        }
    }

    #[async_trait]
    impl FlowEngine for ScriptedEngine {
        async fn start_flow(
            &self,
            job_id: &str,
            _spec: &FlowSpec,
            _lifetime: Option<SignedDuration>,
        ) -> CronResult<String> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(CronError::transient("engine unavailable"));
            }
            let flow_id = format!("F:{:016X}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.started
                .lock()
                .unwrap()
                .push((job_id.to_string(), flow_id.clone()));
            self.outstanding.lock().unwrap().insert(flow_id.clone());
            Ok(flow_id)
        }

        async fn is_outstanding(&self, flow_id: &str) -> CronResult<bool> {
            Ok(self.outstanding.lock().unwrap().contains(flow_id))
        }

        async fn has_outstanding_for_job(&self, job_id: &str) -> CronResult<bool> {
            let outstanding = self.outstanding.lock().unwrap();
            Ok(self
                .started
                .lock()
                .unwrap()
                .iter()
                .any(|(job, flow)| job == job_id && outstanding.contains(flow)))
        }
    }

    struct KnownFlows;

    impl FlowTypeRegistry for KnownFlows {
        fn contains(&self, flow_name: &str) -> bool {
            flow_name == "noop"
        }
    }

    struct Fixture {
        manager: CronManager,
        engine: Arc<ScriptedEngine>,
        store: Arc<dyn JobStore>,
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..SchedulerConfig::default()
        }
    }

    fn fixture_with(config: SchedulerConfig) -> Fixture {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let manager = CronManager::new(
            Arc::clone(&store),
            engine.clone(),
            Arc::new(KnownFlows),
            &config,
        );
        Fixture {
            manager,
            engine,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(config())
    }

    fn t0() -> Timestamp {
        Timestamp::from_second(1_700_000_000).unwrap()
    }

    fn at(secs: i64) -> Timestamp {
        t0() + SignedDuration::from_secs(secs)
    }

    fn args(periodicity_secs: i64, allow_overruns: bool) -> ScheduleFlowArgs {
        ScheduleFlowArgs {
            flow_spec: FlowSpec::new("noop", json!({})),
            periodicity: SignedDuration::from_secs(periodicity_secs),
            lifetime: None,
            allow_overruns,
            description: "every ten seconds".to_string(),
        }
    }

    async fn enabled_job(f: &Fixture, allow_overruns: bool) -> String {
        f.manager
            .create_job(args(10, allow_overruns), CronJobState::Enabled, t0())
            .await
            .unwrap()
    }

    async fn run_one(f: &Fixture, id: &str, force: bool, now: Timestamp) -> CronResult<RunOutcome> {
        let mut results = f.manager.run_once(&[id.to_string()], force, now).await;
        results.pop().unwrap().1
    }

    /// The engine finishes the flow and its completion is recorded.
    async fn complete(f: &Fixture, id: &str, flow_id: &str, now: Timestamp) {
        f.engine.finish(flow_id);
        f.manager
            .report_completion(id, flow_id, RunStatus::Ok, now)
            .await
            .unwrap();
    }

    fn started_flow(outcome: RunOutcome) -> String {
        match outcome {
            RunOutcome::Started { flow_id } => flow_id,
            other => panic!("expected a started run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schedule_flow_creates_disabled_job() {
        let f = fixture();
        let id = f.manager.schedule_flow(args(10, false), t0()).await.unwrap();

        let job = f.manager.get_job(&id).await.unwrap();
        assert!(id.starts_with("noop_"));
        assert_eq!(job.state, CronJobState::Disabled);
        assert_eq!(job.last_run_time, None);
        assert_eq!(job.current_run_id, None);
    }

    #[tokio::test]
    async fn test_schedule_flow_rejects_unknown_flow_and_bad_periodicity() {
        let f = fixture();

        let mut unknown = args(10, false);
        unknown.flow_spec.name = "missing".to_string();
        assert!(matches!(
            f.manager.schedule_flow(unknown, t0()).await,
            Err(CronError::InvalidArgument(_))
        ));

        assert!(matches!(
            f.manager.schedule_flow(args(0, false), t0()).await,
            Err(CronError::InvalidArgument(_))
        ));
        assert_eq!(f.manager.list_jobs(0, 0).await.unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_disabled_job_is_never_started() {
        let f = fixture();
        let id = f.manager.schedule_flow(args(10, false), t0()).await.unwrap();

        let summary = f.manager.sweep_due(at(100)).await.unwrap();
        assert_eq!(summary.started, 0);
        assert_eq!(summary.skipped, 1);

        assert_eq!(
            run_one(&f, &id, false, at(100)).await.unwrap(),
            RunOutcome::Skipped {
                reason: SkipReason::Disabled
            }
        );
        assert_eq!(f.engine.starts(), 0);
    }

    #[tokio::test]
    async fn test_periodicity_gates_runs() {
        let f = fixture();
        let id = enabled_job(&f, false).await;

        let first = f.manager.sweep_due(t0()).await.unwrap();
        assert_eq!(first.started, 1);
        let job = f.manager.get_job(&id).await.unwrap();
        assert_eq!(job.last_run_time, Some(t0()));
        let flow_id = job.current_run_id.clone().unwrap();
        complete(&f, &id, &flow_id, at(1)).await;

        let early = f.manager.sweep_due(at(5)).await.unwrap();
        assert_eq!(early.started, 0);
        assert_eq!(early.skipped, 1);
        assert_eq!(
            run_one(&f, &id, false, at(5)).await.unwrap(),
            RunOutcome::Skipped {
                reason: SkipReason::NotDue
            }
        );

        let due = f.manager.sweep_due(at(11)).await.unwrap();
        assert_eq!(due.started, 1);
        assert_eq!(f.engine.starts(), 2);
        assert_eq!(
            f.manager.get_job(&id).await.unwrap().last_run_time,
            Some(at(11))
        );
    }

    #[tokio::test]
    async fn test_overrun_prevented_while_previous_run_outstanding() {
        let f = fixture();
        let id = enabled_job(&f, false).await;

        let flow_id = started_flow(run_one(&f, &id, false, t0()).await.unwrap());

        assert_eq!(
            run_one(&f, &id, false, at(20)).await.unwrap(),
            RunOutcome::Skipped {
                reason: SkipReason::OverrunPrevented
            }
        );

        f.engine.finish(&flow_id);
        assert_eq!(
            run_one(&f, &id, false, at(20)).await.unwrap(),
            RunOutcome::Skipped {
                reason: SkipReason::OverrunPrevented
            }
        );

        complete(&f, &id, &flow_id, at(20)).await;
        started_flow(run_one(&f, &id, false, at(20)).await.unwrap());
        assert_eq!(f.engine.starts(), 2);
    }

    #[tokio::test]
    async fn test_overruns_allowed_start_regardless() {
        let f = fixture();
        let id = enabled_job(&f, true).await;

        started_flow(run_one(&f, &id, false, t0()).await.unwrap());
        started_flow(run_one(&f, &id, false, at(10)).await.unwrap());
        assert_eq!(f.engine.starts(), 2);
    }

    #[tokio::test]
    async fn test_force_runs_job_that_is_not_due() {
        let f = fixture();
        let id = enabled_job(&f, false).await;

        started_flow(run_one(&f, &id, false, t0()).await.unwrap());
        let forced = started_flow(run_one(&f, &id, true, at(1)).await.unwrap());

        let job = f.manager.get_job(&id).await.unwrap();
        assert_eq!(job.last_run_time, Some(at(1)));
        assert_eq!(job.current_run_id, Some(forced));
        assert_eq!(f.engine.starts(), 2);
    }

    #[tokio::test]
    async fn test_last_run_time_never_moves_backwards() {
        let f = fixture();
        let id = enabled_job(&f, true).await;

        started_flow(run_one(&f, &id, true, at(30)).await.unwrap());
        started_flow(run_one(&f, &id, true, at(10)).await.unwrap());

        let job = f.manager.get_job(&id).await.unwrap();
        assert_eq!(job.last_run_time, Some(at(30)));
    }

    #[tokio::test]
    async fn test_force_on_disabled_job_respects_setting() {
        let f = fixture();
        let id = f.manager.schedule_flow(args(10, false), t0()).await.unwrap();
        assert_eq!(
            run_one(&f, &id, true, t0()).await.unwrap(),
            RunOutcome::Skipped {
                reason: SkipReason::Disabled
            }
        );

        let lenient = fixture_with(SchedulerConfig {
            force_requires_enabled: false,
            ..config()
        });
        let id = lenient
            .manager
            .schedule_flow(args(10, false), t0())
            .await
            .unwrap();
        started_flow(run_one(&lenient, &id, true, t0()).await.unwrap());
        assert_eq!(lenient.engine.starts(), 1);
    }

    #[tokio::test]
    async fn test_started_run_is_recorded_and_completed() {
        let f = fixture();
        let id = enabled_job(&f, false).await;
        let flow_id = started_flow(run_one(&f, &id, false, t0()).await.unwrap());

        let (runs, total) = f.manager.list_runs(&id, 0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(runs[0].flow_id, flow_id);
        assert_eq!(runs[0].status, RunStatus::Pending);
        assert_eq!(runs[0].started_at, t0());

        let finished = f
            .manager
            .report_completion(&id, &flow_id, RunStatus::Ok, at(3))
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Ok);
        assert_eq!(finished.finished_at, Some(at(3)));

        assert!(matches!(
            f.manager
                .report_completion(&id, &flow_id, RunStatus::Pending, at(4))
                .await,
            Err(CronError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_after_two_errors_in_recent_runs() {
        let f = fixture();
        let id = enabled_job(&f, true).await;

        for (i, status) in [RunStatus::Ok, RunStatus::Error, RunStatus::Error]
            .into_iter()
            .enumerate()
        {
            let flow_id = started_flow(run_one(&f, &id, true, at(i as i64)).await.unwrap());
            f.manager
                .report_completion(&id, &flow_id, status, at(i as i64))
                .await
                .unwrap();
        }

        assert!(f.manager.is_failing(&id).await.unwrap());
        assert!(f.manager.get_job_view(&id).await.unwrap().is_failing);
    }

    #[tokio::test]
    async fn test_engine_refusal_fails_run_without_history() {
        let f = fixture();
        let id = enabled_job(&f, false).await;
        f.engine.refuse.store(true, Ordering::SeqCst);

        let summary = f.manager.sweep_due(t0()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.started, 0);

        let (runs, _) = f.manager.list_runs(&id, 0, 0).await.unwrap();
        assert!(runs.is_empty());
        assert_eq!(f.manager.get_job(&id).await.unwrap().current_run_id, None);
    }

    #[tokio::test]
    async fn test_delete_removes_job_and_history() {
        let f = fixture();
        let id = enabled_job(&f, false).await;
        started_flow(run_one(&f, &id, false, t0()).await.unwrap());

        f.manager.delete(&id).await.unwrap();

        assert!(matches!(
            f.manager.get_job(&id).await,
            Err(CronError::NotFound(_))
        ));
        assert!(matches!(
            f.manager.list_runs(&id, 0, 0).await,
            Err(CronError::NotFound(_))
        ));
        assert!(matches!(
            f.manager.delete(&id).await,
            Err(CronError::NotFound(_))
        ));
        assert!(matches!(
            run_one(&f, &id, true, at(100)).await,
            Err(CronError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let f = fixture();
        let id = f.manager.schedule_flow(args(10, false), t0()).await.unwrap();

        let first = f.manager.enable(&id).await.unwrap();
        let second = f.manager.enable(&id).await.unwrap();
        assert_eq!(first.state, CronJobState::Enabled);
        assert_eq!(second.state, CronJobState::Enabled);
        assert_eq!(first.version, second.version);

        let disabled = f.manager.set_state(&id, CronJobState::Disabled).await.unwrap();
        assert_eq!(disabled.state, CronJobState::Disabled);
        assert!(disabled.version > second.version);
    }

    #[tokio::test]
    async fn test_batch_run_isolates_bad_ids() {
        let f = fixture();
        let id = enabled_job(&f, false).await;
        let ids = vec!["noop_ffffffff".to_string(), id.clone(), String::new()];

        let results = f.manager.run_once(&ids, false, t0()).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].1, Err(CronError::NotFound(_))));
        assert_eq!(results[1].0, id);
        assert!(matches!(results[1].1, Ok(RunOutcome::Started { .. })));
        assert!(matches!(results[2].1, Err(CronError::InvalidArgument(_))));
        assert_eq!(f.engine.starts(), 1);
    }

    #[tokio::test]
    async fn test_empty_id_is_invalid_argument() {
        let f = fixture();
        assert!(matches!(
            f.manager.get_job("").await,
            Err(CronError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.manager.enable("  ").await,
            Err(CronError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.manager.delete("").await,
            Err(CronError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.manager.list_runs("", 0, 0).await,
            Err(CronError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_start_each_job_once() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let engines: Vec<Arc<ScriptedEngine>> =
            (0..4).map(|_| Arc::new(ScriptedEngine::default())).collect();
        let managers: Vec<CronManager> = engines
            .iter()
            .map(|engine| {
                CronManager::new(
                    Arc::clone(&store),
                    engine.clone(),
                    Arc::new(KnownFlows),
                    &config(),
                )
            })
            .collect();

        for _ in 0..3 {
            managers[0]
                .create_job(args(10, false), CronJobState::Enabled, t0())
                .await
                .unwrap();
        }

        let summaries = futures::future::join_all(managers.iter().map(|m| m.sweep_due(t0()))).await;
        let started: usize = summaries.into_iter().map(|s| s.unwrap().started).sum();
        let engine_starts: usize = engines.iter().map(|e| e.starts()).sum();

        assert_eq!(started, 3);
        assert_eq!(engine_starts, 3);
    }

    #[tokio::test]
    async fn test_list_jobs_pages_by_id() {
        let f = fixture();
        for _ in 0..5 {
            enabled_job(&f, false).await;
        }

        let (all, total) = f.manager.list_jobs(0, 0).await.unwrap();
        assert_eq!(total, 5);
        let mut ids: Vec<String> = all.iter().map(|j| j.id.clone()).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids, sorted);

        let (page, total) = f.manager.list_jobs(1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        ids.drain(..1);
        assert_eq!(page[0].id, ids[0]);

        let (views, _) = f.manager.list_job_views(0, 0).await.unwrap();
        assert!(views.iter().all(|v| !v.is_failing));
        assert_eq!(f.store.list(0, 0).await.unwrap().1, 5);
    }

    #[tokio::test]
    async fn test_second_scheduler_sees_run_started_by_first() {
        let first = fixture();
        let second_engine = Arc::new(ScriptedEngine::default());
        let second = CronManager::new(
            Arc::clone(&first.store),
            second_engine.clone(),
            Arc::new(KnownFlows),
            &config(),
        );
        let id = enabled_job(&first, false).await;

        assert_eq!(first.manager.sweep_due(t0()).await.unwrap().started, 1);

        let blocked = second.sweep_due(at(11)).await.unwrap();
        assert_eq!(blocked.started, 0);
        assert_eq!(blocked.skipped, 1);
        assert_eq!(second_engine.starts(), 0);

        let flow_id = first.manager.get_job(&id).await.unwrap().current_run_id.unwrap();
        complete(&first, &id, &flow_id, at(12)).await;

        assert_eq!(second.sweep_due(at(12)).await.unwrap().started, 1);
        assert_eq!(second_engine.starts(), 1);
    }

    /// Store double: the first conditional update (the claim) succeeds,
    /// every later one is unavailable. Appends can be made to fail too.
    struct UnreliableStore {
        inner: MemoryJobStore,
        updates: AtomicU64,
        fail_appends: AtomicBool,
    }

    impl UnreliableStore {
        fn new() -> Self {
            Self {
                inner: MemoryJobStore::new(),
                updates: AtomicU64::new(0),
                fail_appends: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl JobStore for UnreliableStore {
        async fn get(&self, id: &str) -> CronResult<CronJob> {
            self.inner.get(id).await
        }

        async fn list(&self, offset: usize, limit: usize) -> CronResult<(Vec<CronJob>, usize)> {
            self.inner.list(offset, limit).await
        }

        async fn insert(&self, job: CronJob) -> CronResult<CronJob> {
            self.inner.insert(job).await
        }

        async fn conditional_update(
            &self,
            id: &str,
            expected_version: i64,
            mutator: crate::cron::store::JobMutator,
        ) -> CronResult<CronJob> {
            if self.updates.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(CronError::transient("store unavailable"));
            }
            self.inner.conditional_update(id, expected_version, mutator).await
        }

        async fn delete(&self, id: &str) -> CronResult<()> {
            self.inner.delete(id).await
        }

        async fn append_run(&self, run: CronJobRun) -> CronResult<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(CronError::transient("store unavailable"));
            }
            self.inner.append_run(run).await
        }

        async fn list_runs(
            &self,
            job_id: &str,
            offset: usize,
            limit: usize,
        ) -> CronResult<(Vec<CronJobRun>, usize)> {
            self.inner.list_runs(job_id, offset, limit).await
        }

        async fn get_run(&self, job_id: &str, flow_id: &str) -> CronResult<CronJobRun> {
            self.inner.get_run(job_id, flow_id).await
        }

        async fn finalize_run(
            &self,
            job_id: &str,
            flow_id: &str,
            status: RunStatus,
            finished_at: Timestamp,
        ) -> CronResult<CronJobRun> {
            self.inner.finalize_run(job_id, flow_id, status, finished_at).await
        }

        async fn purge_runs_before(&self, cutoff: Timestamp) -> CronResult<usize> {
            self.inner.purge_runs_before(cutoff).await
        }
    }

    async fn unreliable_fixture() -> (Arc<UnreliableStore>, Arc<ScriptedEngine>, CronManager, String) {
        let store = Arc::new(UnreliableStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let manager = CronManager::new(store.clone(), engine.clone(), Arc::new(KnownFlows), &config());
        let id = manager
            .create_job(args(10, false), CronJobState::Enabled, t0())
            .await
            .unwrap();
        (store, engine, manager, id)
    }

    #[tokio::test]
    async fn test_unrecorded_run_id_still_prevents_overrun() {
        let (_store, engine, manager, id) = unreliable_fixture().await;

        let mut results = manager.run_once(&[id.clone()], false, t0()).await;
        let flow_id = started_flow(results.pop().unwrap().1.unwrap());
        assert_eq!(manager.get_job(&id).await.unwrap().current_run_id, None);

        let blocked = manager.sweep_due(at(11)).await.unwrap();
        assert_eq!(blocked.started, 0);
        assert_eq!(blocked.skipped, 1);

        // Forgotten by the engine, but the run record is still PENDING.
        engine.finish(&flow_id);
        let blocked = manager.sweep_due(at(12)).await.unwrap();
        assert_eq!(blocked.started, 0);
        assert_eq!(engine.starts(), 1);
    }

    #[tokio::test]
    async fn test_run_that_cannot_be_recorded_is_an_error() {
        let (store, engine, manager, id) = unreliable_fixture().await;
        store.fail_appends.store(true, Ordering::SeqCst);

        let mut results = manager.run_once(&[id.clone()], false, t0()).await;
        assert!(matches!(results.pop().unwrap().1, Err(CronError::Transient(_))));
        assert_eq!(engine.starts(), 1);

        // The engine still knows the flow, so the next period is skipped.
        let blocked = manager.sweep_due(at(11)).await.unwrap();
        assert_eq!(blocked.started, 0);
        assert_eq!(engine.starts(), 1);
    }
}
