//! Failure Classifier.
//!
//! Purely informational: the result never feeds back into scheduling or
//! job state.

use std::sync::Arc;

use crate::cron::error::CronResult;
use crate::cron::models::{CronJobRun, RunStatus};
use crate::cron::store::JobStore;

/// How many of the most recent runs are inspected.
pub const RECENT_RUNS_WINDOW: usize = 4;

/// Errors within the window that mark a job as failing.
pub const FAILURE_THRESHOLD: usize = 2;

/// Run history is read in pages of this size until the window is full.
const HISTORY_PAGE: usize = 16;

/// `runs` must be ordered most recent first. The window covers finished
/// runs only; runs still pending are skipped, not counted.
pub fn is_failing(runs: &[CronJobRun]) -> bool {
    runs.iter()
        .filter(|run| run.status.is_final())
        .take(RECENT_RUNS_WINDOW)
        .filter(|run| run.status == RunStatus::Error)
        .count()
        >= FAILURE_THRESHOLD
}

#[derive(Clone)]
pub struct FailureClassifier {
    store: Arc<dyn JobStore>,
}

impl FailureClassifier {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn is_failing(&self, job_id: &str) -> CronResult<bool> {
        let mut finished = Vec::with_capacity(RECENT_RUNS_WINDOW);
        let mut offset = 0;
        loop {
            let (page, total) = self.store.list_runs(job_id, offset, HISTORY_PAGE).await?;
            let fetched = page.len();
            offset += fetched;
            finished.extend(page.into_iter().filter(|run| run.status.is_final()));
            if fetched == 0 || finished.len() >= RECENT_RUNS_WINDOW || offset >= total {
                break;
            }
        }
        Ok(is_failing(&finished))
    }
}
