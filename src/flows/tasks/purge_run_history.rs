use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::cron::error::{CronError, CronResult};
use crate::flows::types::{FlowContext, FlowTask};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeRunHistoryFlow {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

#[async_trait]
impl FlowTask for PurgeRunHistoryFlow {
    fn flow_name() -> &'static str
    where
        Self: Sized,
    {
        "purge_run_history"
    }

    async fn run(&self, ctx: FlowContext) -> CronResult<()> {
        let retention = SignedDuration::from_hours(i64::from(self.retention_days) * 24);
        let cutoff = Timestamp::now()
            .checked_sub(retention)
            .map_err(|e| CronError::invalid(format!("Retention out of range: {e}")))?;

        let deleted = ctx.store.purge_runs_before(cutoff).await?;

        tracing::info!(
            deleted_count = deleted,
            retention_days = self.retention_days,
            "Run history purge completed"
        );

        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some(format!(
            "Purge cron run history older than {} days",
            self.retention_days
        ))
    }
}
