use std::sync::Arc;

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::cron::error::CronResult;
use crate::cron::models::{FlowSpec, RunStatus};
use crate::cron::store::JobStore;

/// Flow execution context passed to tasks
#[derive(Clone)]
pub struct FlowContext {
    pub flow_id: String,
    pub job_id: String,
    pub store: Arc<dyn JobStore>,
    pub cancellation_token: CancellationToken,
}

/// Trait that all flow tasks must implement
#[async_trait]
pub trait FlowTask: Send + Sync + std::fmt::Debug {
    /// Name under which the flow is registered
    fn flow_name() -> &'static str
    where
        Self: Sized;

    async fn run(&self, ctx: FlowContext) -> CronResult<()>;

    /// Optional description
    fn description(&self) -> Option<String> {
        None
    }
}

/// Out-of-band report that a started flow has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCompletion {
    pub job_id: String,
    pub flow_id: String,
    pub status: RunStatus,
    pub finished_at: Timestamp,
}

/// Execution engine as seen by the cron manager.
#[async_trait]
pub trait FlowEngine: Send + Sync {
    /// Start one flow on behalf of `job_id`. Unknown flow types are
    /// `InvalidArgument`.
    async fn start_flow(
        &self,
        job_id: &str,
        spec: &FlowSpec,
        lifetime: Option<SignedDuration>,
    ) -> CronResult<String>;

    /// Whether a previously started flow has not finished yet.
    async fn is_outstanding(&self, flow_id: &str) -> CronResult<bool>;

    /// Whether this engine is still running any flow it started for
    /// `job_id`, including flows whose id never reached the store.
    async fn has_outstanding_for_job(&self, job_id: &str) -> CronResult<bool>;
}

/// Flow types known when a job is created.
pub trait FlowTypeRegistry: Send + Sync {
    fn contains(&self, flow_name: &str) -> bool;

    /// Check that `spec` names a known flow and its arguments are usable.
    fn validate(&self, spec: &FlowSpec) -> CronResult<()> {
        if self.contains(&spec.name) {
            Ok(())
        } else {
            Err(crate::cron::error::CronError::invalid(format!(
                "Unknown flow type: {}",
                spec.name
            )))
        }
    }
}
