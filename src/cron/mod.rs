//! Cron job management core.
//!
//! Jobs live in a shared [`store::JobStore`]; many schedulers may sweep the
//! same store at once. Conditional updates on the job's version are the only
//! coordination between them.

pub mod error;
pub mod health;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use error::{CronError, CronResult};
pub use health::{FailureClassifier, is_failing};
pub use lifecycle::Lifecycle;
pub use manager::{CronManager, RunOutcome, SweepSummary};
pub use models::{
    CronJob, CronJobRun, CronJobState, CronJobView, FlowSpec, RunStatus, ScheduleFlowArgs,
};
pub use retry::RetryPolicy;
pub use schedule::{Decision, SkipReason, should_run};
pub use scheduler::{SweepScheduler, spawn_completion_listener};
pub use store::{JobStore, MemoryJobStore, PgJobStore, build_store};
