//! State Machine / Lifecycle Controller.
//!
//! ENABLED and DISABLED are the only stored states. Setting a job to the
//! state it already has is a successful no-op. Deletion removes the record.

use std::sync::Arc;

use jiff::Timestamp;
use uuid::Uuid;
use validator::Validate;

use crate::cron::error::{CronError, CronResult};
use crate::cron::models::{CronJob, CronJobState, ScheduleFlowArgs};
use crate::cron::retry::RetryPolicy;
use crate::cron::store::JobStore;
use crate::flows::FlowTypeRegistry;

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn JobStore>,
    flow_types: Arc<dyn FlowTypeRegistry>,
    retry: RetryPolicy,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        flow_types: Arc<dyn FlowTypeRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            flow_types,
            retry,
        }
    }

    fn new_job_id(flow_name: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{flow_name}_{}", &suffix[..8])
    }

    /// Create a job and return its id.
    pub async fn create(
        &self,
        args: ScheduleFlowArgs,
        initial_state: CronJobState,
        now: Timestamp,
    ) -> CronResult<String> {
        args.validate()?;
        self.flow_types.validate(&args.flow_spec)?;

        let job = CronJob {
            id: Self::new_job_id(&args.flow_spec.name),
            description: args.description,
            flow_spec: args.flow_spec,
            periodicity: args.periodicity,
            lifetime: args.lifetime,
            allow_overruns: args.allow_overruns,
            state: initial_state,
            last_run_time: None,
            current_run_id: None,
            created_at: now,
            version: 0,
        };

        let created = self
            .retry
            .retry_transient("insert job", || self.store.insert(job.clone()))
            .await?;

        tracing::info!(
            job_id = %created.id,
            flow = %created.flow_spec.name,
            state = %created.state,
            "Cron job created"
        );
        Ok(created.id)
    }

    pub async fn enable(&self, id: &str) -> CronResult<CronJob> {
        self.set_state(id, CronJobState::Enabled).await
    }

    pub async fn disable(&self, id: &str) -> CronResult<CronJob> {
        self.set_state(id, CronJobState::Disabled).await
    }

    pub async fn set_state(&self, id: &str, state: CronJobState) -> CronResult<CronJob> {
        if id.trim().is_empty() {
            return Err(CronError::invalid("Cron job id must not be empty"));
        }

        for attempt in 0..=self.retry.conflict_retries {
            let job = self
                .retry
                .retry_transient("get job", || self.store.get(id))
                .await?;
            if job.state == state {
                return Ok(job);
            }

            let result = self
                .retry
                .retry_transient("update job state", || {
                    self.store
                        .conditional_update(id, job.version, Box::new(move |j: &mut CronJob| j.state = state))
                })
                .await;

            match result {
                Ok(updated) => {
                    tracing::info!(job_id = %id, %state, "Cron job state changed");
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(job_id = %id, attempt, "State change lost a race, re-reading");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(CronError::transient(format!(
            "Gave up changing state of cron job {id} after repeated conflicts"
        )))
    }

    pub async fn delete(&self, id: &str) -> CronResult<()> {
        if id.trim().is_empty() {
            return Err(CronError::invalid("Cron job id must not be empty"));
        }
        self.retry
            .retry_transient("delete job", || self.store.delete(id))
            .await?;
        tracing::info!(job_id = %id, "Cron job deleted");
        Ok(())
    }
}
