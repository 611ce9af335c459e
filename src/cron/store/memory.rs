//! In-process job store backed by ordered maps.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::cron::error::{CronError, CronResult};
use crate::cron::models::{CronJob, CronJobRun, RunStatus};
use crate::cron::store::{JobMutator, JobStore, page};

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<String, CronJob>,
    /// Runs per job in append order.
    runs: HashMap<String, Vec<CronJobRun>>,
    retired: HashSet<String>,
}

/// Job store kept entirely in memory.
///
/// A single `RwLock` guards jobs and runs together, so every call observes
/// an atomically consistent snapshot.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn most_recent_first(runs: &[CronJobRun]) -> Vec<CronJobRun> {
    // Later appends win ties on started_at.
    let mut sorted: Vec<CronJobRun> = runs.iter().rev().cloned().collect();
    sorted.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    sorted
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &str) -> CronResult<CronJob> {
        let inner = self.inner.read().await;
        inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| CronError::not_found(id))
    }

    async fn list(&self, offset: usize, limit: usize) -> CronResult<(Vec<CronJob>, usize)> {
        let inner = self.inner.read().await;
        let all: Vec<CronJob> = inner.jobs.values().cloned().collect();
        let total = all.len();
        Ok((page(&all, offset, limit), total))
    }

    async fn insert(&self, mut job: CronJob) -> CronResult<CronJob> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) || inner.retired.contains(&job.id) {
            return Err(CronError::invalid(format!(
                "Cron job id {} is already taken",
                job.id
            )));
        }
        job.version = 1;
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: i64,
        mutator: JobMutator,
    ) -> CronResult<CronJob> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| CronError::not_found(id))?;

        if job.version != expected_version {
            return Err(CronError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
            });
        }

        let mut updated = job.clone();
        mutator(&mut updated);
        // Identity and version belong to the store.
        updated.id = job.id.clone();
        updated.version = expected_version + 1;
        *job = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> CronResult<()> {
        let mut inner = self.inner.write().await;
        if inner.jobs.remove(id).is_none() {
            return Err(CronError::not_found(id));
        }
        inner.runs.remove(id);
        inner.retired.insert(id.to_string());
        Ok(())
    }

    async fn append_run(&self, run: CronJobRun) -> CronResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&run.job_id) {
            return Err(CronError::not_found(&run.job_id));
        }
        inner.runs.entry(run.job_id.clone()).or_default().push(run);
        Ok(())
    }

    async fn list_runs(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> CronResult<(Vec<CronJobRun>, usize)> {
        let inner = self.inner.read().await;
        if !inner.jobs.contains_key(job_id) {
            return Err(CronError::not_found(job_id));
        }
        let runs = inner
            .runs
            .get(job_id)
            .map(|runs| most_recent_first(runs))
            .unwrap_or_default();
        let total = runs.len();
        Ok((page(&runs, offset, limit), total))
    }

    async fn get_run(&self, job_id: &str, flow_id: &str) -> CronResult<CronJobRun> {
        let inner = self.inner.read().await;
        inner
            .runs
            .get(job_id)
            .and_then(|runs| runs.iter().find(|r| r.flow_id == flow_id))
            .cloned()
            .ok_or_else(|| CronError::not_found(format!("{job_id}/{flow_id}")))
    }

    async fn finalize_run(
        &self,
        job_id: &str,
        flow_id: &str,
        status: RunStatus,
        finished_at: Timestamp,
    ) -> CronResult<CronJobRun> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(job_id)
            .and_then(|runs| runs.iter_mut().find(|r| r.flow_id == flow_id))
            .ok_or_else(|| CronError::not_found(format!("{job_id}/{flow_id}")))?;

        if run.status.is_final() {
            if run.status == status {
                return Ok(run.clone());
            }
            return Err(CronError::invalid(format!(
                "Run {flow_id} already finished with status {}",
                run.status
            )));
        }

        run.status = status;
        run.finished_at = Some(finished_at);
        Ok(run.clone())
    }

    async fn purge_runs_before(&self, cutoff: Timestamp) -> CronResult<usize> {
        let mut inner = self.inner.write().await;
        let mut purged = 0;
        for runs in inner.runs.values_mut() {
            let before = runs.len();
            runs.retain(|r| !(r.status.is_final() && r.started_at < cutoff));
            purged += before - runs.len();
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::models::{CronJobState, FlowSpec};
    use jiff::SignedDuration;
    use serde_json::json;

    fn job(id: &str) -> CronJob {
        CronJob {
            id: id.to_string(),
            description: String::new(),
            flow_spec: FlowSpec::new("noop", json!({})),
            periodicity: SignedDuration::from_secs(10),
            lifetime: None,
            allow_overruns: false,
            state: CronJobState::Disabled,
            last_run_time: None,
            current_run_id: None,
            created_at: Timestamp::UNIX_EPOCH,
            version: 0,
        }
    }

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_second(secs).unwrap()
    }

    #[tokio::test]
    async fn test_insert_sets_version_one() {
        let store = MemoryJobStore::new();
        let stored = store.insert(job("a")).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.get("a").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_and_retired_ids() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        assert!(matches!(
            store.insert(job("a")).await,
            Err(CronError::InvalidArgument(_))
        ));

        store.delete("a").await.unwrap();
        assert!(matches!(
            store.insert(job("a")).await,
            Err(CronError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let store = MemoryJobStore::new();
        for id in ["c", "a", "b"] {
            store.insert(job(id)).await.unwrap();
        }
        let (jobs, total) = store.list(0, 0).await.unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(total, 3);

        let (jobs, total) = store.list(1, 1).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "b");
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_conditional_update_bumps_version() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        let updated = store
            .conditional_update(
                "a",
                1,
                Box::new(|j: &mut CronJob| j.state = CronJobState::Enabled),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.state, CronJobState::Enabled);
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_version() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        store
            .conditional_update("a", 1, Box::new(|j: &mut CronJob| j.description = "x".into()))
            .await
            .unwrap();

        let result = store
            .conditional_update("a", 1, Box::new(|j: &mut CronJob| j.description = "y".into()))
            .await;
        assert!(matches!(result, Err(CronError::VersionConflict { .. })));
        assert_eq!(store.get("a").await.unwrap().description, "x");
    }

    #[tokio::test]
    async fn test_mutator_cannot_change_identity() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        let updated = store
            .conditional_update(
                "a",
                1,
                Box::new(|j: &mut CronJob| {
                    j.id = "b".into();
                    j.version = 100;
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, "a");
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_runs_and_reports_missing() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        store
            .append_run(CronJobRun::pending("a", "F:1", at(1)))
            .await
            .unwrap();

        store.delete("a").await.unwrap();
        assert!(matches!(store.get("a").await, Err(CronError::NotFound(_))));
        assert!(matches!(
            store.list_runs("a", 0, 0).await,
            Err(CronError::NotFound(_))
        ));
        assert!(matches!(store.delete("a").await, Err(CronError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_runs_most_recent_first() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        for (flow, secs) in [("F:1", 10), ("F:3", 30), ("F:2", 20)] {
            store
                .append_run(CronJobRun::pending("a", flow, at(secs)))
                .await
                .unwrap();
        }

        let (runs, total) = store.list_runs("a", 0, 2).await.unwrap();
        assert_eq!(total, 3);
        let flows: Vec<&str> = runs.iter().map(|r| r.flow_id.as_str()).collect();
        assert_eq!(flows, vec!["F:3", "F:2"]);
    }

    #[tokio::test]
    async fn test_finalize_run_is_idempotent_for_same_status() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        store
            .append_run(CronJobRun::pending("a", "F:1", at(1)))
            .await
            .unwrap();

        let run = store
            .finalize_run("a", "F:1", RunStatus::Ok, at(5))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Ok);
        assert_eq!(run.finished_at, Some(at(5)));

        assert!(
            store
                .finalize_run("a", "F:1", RunStatus::Ok, at(6))
                .await
                .is_ok()
        );
        assert!(matches!(
            store.finalize_run("a", "F:1", RunStatus::Error, at(7)).await,
            Err(CronError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_keeps_pending_and_recent_runs() {
        let store = MemoryJobStore::new();
        store.insert(job("a")).await.unwrap();
        for (flow, secs) in [("F:old", 10), ("F:pending", 11), ("F:new", 100)] {
            store
                .append_run(CronJobRun::pending("a", flow, at(secs)))
                .await
                .unwrap();
        }
        store
            .finalize_run("a", "F:old", RunStatus::Ok, at(12))
            .await
            .unwrap();
        store
            .finalize_run("a", "F:new", RunStatus::Error, at(101))
            .await
            .unwrap();

        let purged = store.purge_runs_before(at(50)).await.unwrap();
        assert_eq!(purged, 1);
        let (_, total) = store.list_runs("a", 0, 0).await.unwrap();
        assert_eq!(total, 2);
    }
}
