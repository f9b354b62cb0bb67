//! Port and runtime dependency bundles for the job worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use rand::Rng;

use crate::domain::ports::{CompetitionLedger, FailedJobRepository, JobQueue, Mailbox};

/// Async sleeping abstraction for the poll loop.
#[async_trait]
pub trait WorkerSleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return the delay to use given the exponential `base` delay.
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Port bundle required by the job worker.
pub struct JobWorkerPorts {
    pub queue: Arc<dyn JobQueue>,
    /// Dead-letter store for jobs that exhausted their retries.
    pub failed_jobs: Arc<dyn FailedJobRepository>,
    pub ledger: Arc<dyn CompetitionLedger>,
    pub mailbox: Arc<dyn Mailbox>,
}

/// Time and pacing helpers used by the worker.
pub struct JobWorkerRuntime {
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn WorkerSleeper>,
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for JobWorkerRuntime {
    fn default() -> Self {
        Self {
            clock: Arc::new(DefaultClock),
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl WorkerSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds up to a quarter of the base delay so retries of jobs that failed
/// together spread out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = base_ms / 4;
        if max_extra == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}
