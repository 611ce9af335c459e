//! PostgreSQL job store using diesel-async.
//!
//! Conditional updates are `UPDATE ... WHERE id = $1 AND version = $2`;
//! zero affected rows means another writer got there first.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use jiff::{SignedDuration, Timestamp};
use jiff_diesel::ToDiesel;
use serde_json::Value as JsonValue;

use crate::cron::error::{CronError, CronResult};
use crate::cron::models::{CronJob, CronJobRun, CronJobState, FlowSpec, RunStatus};
use crate::cron::store::{JobMutator, JobStore};
use crate::db::AsyncDbPool;
use crate::schema::{cron_job_runs, cron_jobs, retired_cron_job_ids};

// ============================================================================
// Row models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = cron_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct CronJobRow {
    id: String,
    description: String,
    flow_name: String,
    flow_args: JsonValue,
    periodicity_ms: i64,
    lifetime_ms: Option<i64>,
    allow_overruns: bool,
    state: CronJobState,
    last_run_time: Option<jiff_diesel::Timestamp>,
    current_run_id: Option<String>,
    created_at: jiff_diesel::Timestamp,
    version: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = cron_job_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct CronJobRunRow {
    job_id: String,
    flow_id: String,
    started_at: jiff_diesel::Timestamp,
    finished_at: Option<jiff_diesel::Timestamp>,
    status: RunStatus,
}

fn duration_to_millis(duration: SignedDuration) -> CronResult<i64> {
    i64::try_from(duration.as_millis())
        .map_err(|_| CronError::invalid(format!("Duration {duration} is out of range")))
}

impl TryFrom<&CronJob> for CronJobRow {
    type Error = CronError;

    fn try_from(job: &CronJob) -> Result<Self, Self::Error> {
        Ok(Self {
            id: job.id.clone(),
            description: job.description.clone(),
            flow_name: job.flow_spec.name.clone(),
            flow_args: job.flow_spec.args.clone(),
            periodicity_ms: duration_to_millis(job.periodicity)?,
            lifetime_ms: job.lifetime.map(duration_to_millis).transpose()?,
            allow_overruns: job.allow_overruns,
            state: job.state,
            last_run_time: job.last_run_time.map(|t| t.to_diesel()),
            current_run_id: job.current_run_id.clone(),
            created_at: job.created_at.to_diesel(),
            version: job.version,
        })
    }
}

impl From<CronJobRow> for CronJob {
    fn from(row: CronJobRow) -> Self {
        Self {
            id: row.id,
            description: row.description,
            flow_spec: FlowSpec::new(row.flow_name, row.flow_args),
            periodicity: SignedDuration::from_millis(row.periodicity_ms),
            lifetime: row.lifetime_ms.map(SignedDuration::from_millis),
            allow_overruns: row.allow_overruns,
            state: row.state,
            last_run_time: row.last_run_time.map(|t| t.to_jiff()),
            current_run_id: row.current_run_id,
            created_at: row.created_at.to_jiff(),
            version: row.version,
        }
    }
}

impl From<&CronJobRun> for CronJobRunRow {
    fn from(run: &CronJobRun) -> Self {
        Self {
            job_id: run.job_id.clone(),
            flow_id: run.flow_id.clone(),
            started_at: run.started_at.to_diesel(),
            finished_at: run.finished_at.map(|t| t.to_diesel()),
            status: run.status,
        }
    }
}

impl From<CronJobRunRow> for CronJobRun {
    fn from(row: CronJobRunRow) -> Self {
        Self {
            job_id: row.job_id,
            flow_id: row.flow_id,
            started_at: row.started_at.to_jiff(),
            finished_at: row.finished_at.map(|t| t.to_jiff()),
            status: row.status,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Job store shared by every scheduler instance pointed at the same database.
#[derive(Clone)]
pub struct PgJobStore {
    pool: AsyncDbPool,
    request_timeout: Duration,
}

impl PgJobStore {
    pub fn new(pool: AsyncDbPool, request_timeout: Duration) -> Self {
        Self {
            pool,
            request_timeout,
        }
    }

    async fn conn(&self) -> CronResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| CronError::transient(format!("connection pool: {e}")))
    }

    /// Every store call is bounded; running out of time is a transient failure.
    async fn timed<T, F>(&self, operation: F) -> CronResult<T>
    where
        F: Future<Output = CronResult<T>> + Send,
    {
        tokio::time::timeout(self.request_timeout, operation).await?
    }

    async fn load_job(conn: &mut AsyncPgConnection, id: &str) -> CronResult<CronJob> {
        cron_jobs::table
            .find(id)
            .select(CronJobRow::as_select())
            .first(conn)
            .await
            .optional()?
            .map(CronJob::from)
            .ok_or_else(|| CronError::not_found(id))
    }

    async fn load_run(
        conn: &mut AsyncPgConnection,
        job_id: &str,
        flow_id: &str,
    ) -> CronResult<CronJobRun> {
        cron_job_runs::table
            .find((job_id, flow_id))
            .select(CronJobRunRow::as_select())
            .first(conn)
            .await
            .optional()?
            .map(CronJobRun::from)
            .ok_or_else(|| CronError::not_found(format!("{job_id}/{flow_id}")))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, id: &str) -> CronResult<CronJob> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Self::load_job(&mut conn, id).await
        })
        .await
    }

    async fn list(&self, offset: usize, limit: usize) -> CronResult<(Vec<CronJob>, usize)> {
        self.timed(async {
            let mut conn = self.conn().await?;

            let total: i64 = cron_jobs::table.count().get_result(&mut conn).await?;

            let mut query = cron_jobs::table
                .select(CronJobRow::as_select())
                .order(cron_jobs::id.asc())
                .offset(offset as i64)
                .into_boxed();
            if limit > 0 {
                query = query.limit(limit as i64);
            }
            let rows: Vec<CronJobRow> = query.load(&mut conn).await?;

            Ok((
                rows.into_iter().map(CronJob::from).collect(),
                total as usize,
            ))
        })
        .await
    }

    async fn insert(&self, mut job: CronJob) -> CronResult<CronJob> {
        job.version = 1;
        let row = CronJobRow::try_from(&job)?;
        self.timed(async {
            let mut conn = self.conn().await?;
            conn.transaction::<_, CronError, _>(|conn| {
                async move {
                    let retired: i64 = retired_cron_job_ids::table
                        .filter(retired_cron_job_ids::id.eq(&row.id))
                        .count()
                        .get_result(conn)
                        .await?;
                    if retired > 0 {
                        return Err(CronError::invalid(format!(
                            "Cron job id {} was used by a deleted job",
                            row.id
                        )));
                    }

                    diesel::insert_into(cron_jobs::table)
                        .values(&row)
                        .execute(conn)
                        .await?;
                    Ok(())
                }
                .scope_boxed()
            })
            .await
        })
        .await?;
        Ok(job)
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: i64,
        mutator: JobMutator,
    ) -> CronResult<CronJob> {
        self.timed(async move {
            let mut conn = self.conn().await?;
            let current = Self::load_job(&mut conn, id).await?;
            if current.version != expected_version {
                return Err(CronError::VersionConflict {
                    id: id.to_string(),
                    expected: expected_version,
                });
            }

            let mut updated = current.clone();
            mutator(&mut updated);
            updated.id = current.id;
            updated.version = expected_version + 1;
            let row = CronJobRow::try_from(&updated)?;

            let affected = diesel::update(
                cron_jobs::table
                    .filter(cron_jobs::id.eq(id))
                    .filter(cron_jobs::version.eq(expected_version)),
            )
            .set(&row)
            .execute(&mut conn)
            .await?;

            if affected == 0 {
                return Err(CronError::VersionConflict {
                    id: id.to_string(),
                    expected: expected_version,
                });
            }
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, id: &str) -> CronResult<()> {
        let id = id.to_string();
        self.timed(async {
            let mut conn = self.conn().await?;
            conn.transaction::<_, CronError, _>(|conn| {
                async move {
                    diesel::delete(cron_job_runs::table.filter(cron_job_runs::job_id.eq(&id)))
                        .execute(conn)
                        .await?;

                    let deleted = diesel::delete(cron_jobs::table.find(&id))
                        .execute(conn)
                        .await?;
                    if deleted == 0 {
                        return Err(CronError::not_found(&id));
                    }

                    diesel::insert_into(retired_cron_job_ids::table)
                        .values((
                            retired_cron_job_ids::id.eq(&id),
                            retired_cron_job_ids::retired_at.eq(Timestamp::now().to_diesel()),
                        ))
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                    Ok(())
                }
                .scope_boxed()
            })
            .await
        })
        .await
    }

    async fn append_run(&self, run: CronJobRun) -> CronResult<()> {
        let row = CronJobRunRow::from(&run);
        self.timed(async {
            let mut conn = self.conn().await?;
            diesel::insert_into(cron_job_runs::table)
                .values(&row)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn list_runs(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> CronResult<(Vec<CronJobRun>, usize)> {
        self.timed(async {
            let mut conn = self.conn().await?;

            let exists: i64 = cron_jobs::table
                .filter(cron_jobs::id.eq(job_id))
                .count()
                .get_result(&mut conn)
                .await?;
            if exists == 0 {
                return Err(CronError::not_found(job_id));
            }

            let total: i64 = cron_job_runs::table
                .filter(cron_job_runs::job_id.eq(job_id))
                .count()
                .get_result(&mut conn)
                .await?;

            let mut query = cron_job_runs::table
                .filter(cron_job_runs::job_id.eq(job_id))
                .select(CronJobRunRow::as_select())
                .order(cron_job_runs::started_at.desc())
                .offset(offset as i64)
                .into_boxed();
            if limit > 0 {
                query = query.limit(limit as i64);
            }
            let rows: Vec<CronJobRunRow> = query.load(&mut conn).await?;

            Ok((
                rows.into_iter().map(CronJobRun::from).collect(),
                total as usize,
            ))
        })
        .await
    }

    async fn get_run(&self, job_id: &str, flow_id: &str) -> CronResult<CronJobRun> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Self::load_run(&mut conn, job_id, flow_id).await
        })
        .await
    }

    async fn finalize_run(
        &self,
        job_id: &str,
        flow_id: &str,
        status: RunStatus,
        finished_at: Timestamp,
    ) -> CronResult<CronJobRun> {
        self.timed(async {
            let mut conn = self.conn().await?;

            let affected = diesel::update(
                cron_job_runs::table
                    .find((job_id, flow_id))
                    .filter(cron_job_runs::status.eq(RunStatus::Pending)),
            )
            .set((
                cron_job_runs::status.eq(status),
                cron_job_runs::finished_at.eq(Some(finished_at.to_diesel())),
            ))
            .execute(&mut conn)
            .await?;

            let run = Self::load_run(&mut conn, job_id, flow_id).await?;
            if affected == 0 && run.status != status {
                return Err(CronError::invalid(format!(
                    "Run {flow_id} already finished with status {}",
                    run.status
                )));
            }
            Ok(run)
        })
        .await
    }

    async fn purge_runs_before(&self, cutoff: Timestamp) -> CronResult<usize> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let purged = diesel::delete(
                cron_job_runs::table
                    .filter(cron_job_runs::started_at.lt(cutoff.to_diesel()))
                    .filter(cron_job_runs::status.ne(RunStatus::Pending)),
            )
            .execute(&mut conn)
            .await?;
            Ok(purged)
        })
        .await
    }
}
