use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::SchedulerConfig;
use crate::cron::error::CronResult;

/// Bounded retry settings shared by the lifecycle controller and the manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub conflict_retries: u32,
    pub transient_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            conflict_retries: config.conflict_retries,
            transient_retries: config.transient_retries,
            base_delay: config.retry_base_delay(),
            multiplier: config.retry_backoff_multiplier,
            max_delay: config.retry_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 50% random jitter, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let base = self.base_delay.as_secs_f64() * exp;
        let jitter = if base > 0.0 {
            rand::rng().random_range(0.0..=base * 0.5)
        } else {
            0.0
        };
        let capped = (base + jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the transient retry budget is spent.
    pub async fn retry_transient<T, F, Fut>(&self, operation: &'static str, mut call: F) -> CronResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CronResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.transient_retries => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cron::error::CronError;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            conflict_retries: 3,
            transient_retries: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy();
        for attempt in 0..40 {
            assert!(policy.delay(attempt) <= Duration::from_millis(5));
        }
        assert!(policy.delay(0) >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_retries_transient_until_budget_spent() {
        let calls = AtomicU32::new(0);
        let result: CronResult<()> = policy()
            .retry_transient("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CronError::transient("down"))
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let calls = AtomicU32::new(0);
        let result: CronResult<()> = policy()
            .retry_transient("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CronError::not_found("x"))
            })
            .await;
        assert!(matches!(result, Err(CronError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .retry_transient("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CronError::transient("blip"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }
}
