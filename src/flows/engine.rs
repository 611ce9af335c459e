//! In-process execution engine.
//!
//! Flows run as tokio tasks. Every started flow stays in the outstanding
//! map until its task finishes, and each finish is published once on the
//! completion channel.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use jiff::{SignedDuration, Timestamp};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cron::error::{CronError, CronResult};
use crate::cron::models::{FlowSpec, RunStatus};
use crate::cron::store::JobStore;
use crate::flows::registry::FlowRegistry;
use crate::flows::types::{FlowCompletion, FlowContext, FlowEngine};

const IDLE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(25);

pub struct LocalFlowEngine {
    registry: Arc<FlowRegistry>,
    store: Arc<dyn JobStore>,
    /// Running flows: flow id to the job that started it.
    outstanding: Arc<DashMap<String, String>>,
    completions: mpsc::UnboundedSender<FlowCompletion>,
    shutdown: CancellationToken,
}

impl LocalFlowEngine {
    /// Create the engine and the receiving end of its completion events.
    pub fn new(
        registry: Arc<FlowRegistry>,
        store: Arc<dyn JobStore>,
    ) -> (Self, mpsc::UnboundedReceiver<FlowCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            registry,
            store,
            outstanding: Arc::new(DashMap::new()),
            completions: tx,
            shutdown: CancellationToken::new(),
        };
        (engine, rx)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Cancel every running flow. Cancelled flows still report completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until no flow is outstanding. Returns false if `limit` elapsed
    /// first.
    pub async fn wait_idle(&self, limit: std::time::Duration) -> bool {
        let idle = async {
            while !self.outstanding.is_empty() {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(limit, idle).await.is_ok()
    }

    fn new_flow_id() -> String {
        format!("F:{:016X}", rand::random::<u64>())
    }
}

#[async_trait]
impl FlowEngine for LocalFlowEngine {
    async fn start_flow(
        &self,
        job_id: &str,
        spec: &FlowSpec,
        lifetime: Option<SignedDuration>,
    ) -> CronResult<String> {
        if self.shutdown.is_cancelled() {
            return Err(CronError::transient("execution engine is shutting down"));
        }

        let task = self.registry.create_task(spec)?;
        let flow_id = Self::new_flow_id();
        let token = self.shutdown.child_token();
        self.outstanding.insert(flow_id.clone(), job_id.to_string());

        let ctx = FlowContext {
            flow_id: flow_id.clone(),
            job_id: job_id.to_string(),
            store: Arc::clone(&self.store),
            cancellation_token: token,
        };
        let outstanding = Arc::clone(&self.outstanding);
        let completions = self.completions.clone();
        let flow_name = spec.name.clone();
        let lifetime = lifetime.and_then(|l| std::time::Duration::try_from(l).ok());

        tokio::spawn(async move {
            let job_id = ctx.job_id.clone();
            let flow_id = ctx.flow_id.clone();

            let result = match lifetime {
                Some(limit) => match tokio::time::timeout(limit, task.run(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(CronError::transient(format!(
                        "flow exceeded its lifetime of {limit:?}"
                    ))),
                },
                None => task.run(ctx).await,
            };

            let status = match &result {
                Ok(()) => RunStatus::Ok,
                Err(e) => {
                    tracing::warn!(%job_id, %flow_id, flow = %flow_name, error = %e, "Flow failed");
                    RunStatus::Error
                }
            };

            // Publish before leaving the outstanding map so an idle engine
            // never has completions still to send.
            let completion = FlowCompletion {
                job_id,
                flow_id: flow_id.clone(),
                status,
                finished_at: Timestamp::now(),
            };
            if completions.send(completion).is_err() {
                tracing::debug!("Completion listener is gone; dropping flow completion");
            }
            outstanding.remove(&flow_id);
        });

        tracing::debug!(%job_id, %flow_id, flow = %spec.name, "Flow started");
        Ok(flow_id)
    }

    async fn is_outstanding(&self, flow_id: &str) -> CronResult<bool> {
        Ok(self.outstanding.contains_key(flow_id))
    }

    async fn has_outstanding_for_job(&self, job_id: &str) -> CronResult<bool> {
        Ok(self
            .outstanding
            .iter()
            .any(|entry| entry.value() == job_id))
    }
}
