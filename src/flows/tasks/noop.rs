use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cron::error::{CronError, CronResult};
use crate::flows::types::{FlowContext, FlowTask};

/// Does nothing, optionally after a delay. Handy for smoke-testing schedules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoopFlow {
    #[serde(default)]
    pub delay_ms: u64,
}

#[async_trait]
impl FlowTask for NoopFlow {
    fn flow_name() -> &'static str
    where
        Self: Sized,
    {
        "noop"
    }

    async fn run(&self, ctx: FlowContext) -> CronResult<()> {
        if self.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.delay_ms)) => {}
                _ = ctx.cancellation_token.cancelled() => {
                    return Err(CronError::transient("flow cancelled"));
                }
            }
        }
        tracing::debug!(flow_id = %ctx.flow_id, job_id = %ctx.job_id, "Noop flow finished");
        Ok(())
    }
}
