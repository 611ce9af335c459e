//! Job Store Adapter.
//!
//! Thin interface over the durable object store holding job records and run
//! history. `conditional_update` is the only concurrency primitive the rest
//! of the manager relies on: it must fail with `VersionConflict` instead of
//! overwriting a record that changed since it was read.
//!
//! Backends:
//! - `memory` - in-process maps, for tests and single-process deployments
//! - `postgres` - diesel-async over a bb8 pool, shared between schedulers

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::config::settings::{StoreBackend, StoreConfig};
use crate::cron::error::CronResult;
use crate::cron::models::{CronJob, CronJobRun, RunStatus};
use crate::db::AsyncDbPool;

/// In-place modification applied to a job under a conditional update.
pub type JobMutator = Box<dyn FnOnce(&mut CronJob) + Send>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch one job; `NotFound` if absent.
    async fn get(&self, id: &str) -> CronResult<CronJob>;

    /// Jobs ordered by id, plus the total number of jobs. `limit = 0` means
    /// unbounded from `offset`.
    async fn list(&self, offset: usize, limit: usize) -> CronResult<(Vec<CronJob>, usize)>;

    /// Create a new record at version 1. Ids that exist or were ever deleted
    /// are rejected with `InvalidArgument`.
    async fn insert(&self, job: CronJob) -> CronResult<CronJob>;

    /// Apply `mutator` if the stored version equals `expected_version`, and
    /// return the stored result with its version incremented.
    async fn conditional_update(
        &self,
        id: &str,
        expected_version: i64,
        mutator: JobMutator,
    ) -> CronResult<CronJob>;

    /// Remove a job and its run history. The id is retired for good.
    async fn delete(&self, id: &str) -> CronResult<()>;

    async fn append_run(&self, run: CronJobRun) -> CronResult<()>;

    /// Runs of one job, most recent first, plus the total run count.
    async fn list_runs(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> CronResult<(Vec<CronJobRun>, usize)>;

    async fn get_run(&self, job_id: &str, flow_id: &str) -> CronResult<CronJobRun>;

    /// Record the final status of a run. Repeating the same final status is
    /// accepted; changing an already final status is `InvalidArgument`.
    async fn finalize_run(
        &self,
        job_id: &str,
        flow_id: &str,
        status: RunStatus,
        finished_at: Timestamp,
    ) -> CronResult<CronJobRun>;

    /// Delete finished runs started before `cutoff`; returns how many went.
    async fn purge_runs_before(&self, cutoff: Timestamp) -> CronResult<usize>;
}

/// Build the configured store backend.
///
/// The postgres backend needs a pool; the memory backend ignores it.
pub fn build_store(
    config: &StoreConfig,
    pool: Option<AsyncDbPool>,
) -> anyhow::Result<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
        StoreBackend::Postgres => {
            let pool = pool.ok_or_else(|| {
                anyhow::anyhow!("postgres store backend requires a database pool")
            })?;
            Arc::new(PgJobStore::new(pool, config.request_timeout()))
        }
    };
    Ok(store)
}

/// Slice `items` the way every `list` call does: `limit = 0` is unbounded.
pub(crate) fn page<T: Clone>(items: &[T], offset: usize, limit: usize) -> Vec<T> {
    let start = offset.min(items.len());
    let end = if limit == 0 {
        items.len()
    } else {
        start.saturating_add(limit).min(items.len())
    };
    items[start..end].to_vec()
}
