use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::cron::error::CronError;
use crate::cron::manager::CronManager;
use crate::error::{AppError, AppResult};
use crate::flows::FlowCompletion;

const COMPLETION_ATTEMPTS: u32 = 5;
const COMPLETION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Periodic trigger that runs `CronManager::sweep_due` on a fixed interval.
pub struct SweepScheduler {
    scheduler: Arc<Mutex<JobScheduler>>,
    manager: Arc<CronManager>,
    interval: Duration,
    sweeping: Arc<AtomicBool>,
}

impl SweepScheduler {
    pub async fn new(manager: Arc<CronManager>, config: &SchedulerConfig) -> AppResult<Self> {
        let scheduler = JobScheduler::new().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        Ok(Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            manager,
            interval: config.sweep_interval(),
            sweeping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register the sweep job and start ticking
    pub async fn start(&self) -> AppResult<()> {
        let manager = Arc::clone(&self.manager);
        let sweeping = Arc::clone(&self.sweeping);

        let sweep_job = Job::new_repeated_async(self.interval, move |_uuid, _lock| {
            let manager = Arc::clone(&manager);
            let sweeping = Arc::clone(&sweeping);

            Box::pin(async move {
                let Some(_guard) = SweepGuard::acquire(&sweeping) else {
                    tracing::debug!("Previous sweep still running; skipping tick");
                    return;
                };
                if let Err(e) = manager.sweep_due(Timestamp::now()).await {
                    tracing::error!(error = %e, "Sweep failed");
                }
            })
        })
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        let scheduler = self.scheduler.lock().await;
        scheduler.add(sweep_job).await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        scheduler.start().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        tracing::info!(interval_secs = self.interval.as_secs(), "Sweep scheduler started");
        Ok(())
    }

    /// Stop the scheduler gracefully
    pub async fn stop(&self) -> AppResult<()> {
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;
        tracing::info!("Sweep scheduler stopped");
        Ok(())
    }
}

/// Marks a sweep as in progress. The mark is cleared on drop, so a sweep
/// that panics does not block every later tick.
struct SweepGuard(Arc<AtomicBool>);

impl SweepGuard {
    fn acquire(sweeping: &Arc<AtomicBool>) -> Option<Self> {
        if sweeping.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(Arc::clone(sweeping)))
        }
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Persist flow completions as they arrive until `shutdown` fires or the
/// engine goes away. On shutdown, completions already queued are still
/// recorded before the task ends.
pub fn spawn_completion_listener(
    manager: Arc<CronManager>,
    mut completions: mpsc::UnboundedReceiver<FlowCompletion>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut recording = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                completion = completions.recv() => match completion {
                    Some(completion) => {
                        recording.spawn(record_completion(Arc::clone(&manager), completion));
                    }
                    None => break,
                },
            }
            while recording.try_join_next().is_some() {}
        }

        while let Ok(completion) = completions.try_recv() {
            recording.spawn(record_completion(Arc::clone(&manager), completion));
        }
        while recording.join_next().await.is_some() {}
        tracing::debug!("Completion listener stopped");
    })
}

/// A fast flow can finish before its run record is appended, so a missing
/// run is retried a few times before giving up.
async fn record_completion(manager: Arc<CronManager>, completion: FlowCompletion) {
    let FlowCompletion {
        job_id,
        flow_id,
        status,
        finished_at,
    } = completion;

    for attempt in 1..=COMPLETION_ATTEMPTS {
        match manager
            .report_completion(&job_id, &flow_id, status, finished_at)
            .await
        {
            Ok(_) => return,
            Err(CronError::NotFound(_)) if attempt < COMPLETION_ATTEMPTS => {
                tokio::time::sleep(COMPLETION_RETRY_DELAY * attempt).await;
            }
            Err(e) => {
                tracing::warn!(%job_id, %flow_id, %status, error = %e, "Dropping flow completion");
                return;
            }
        }
    }
}
