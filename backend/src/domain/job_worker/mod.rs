//! Background worker draining the registration and reminder queues.
//!
//! Delivery is at-least-once. A handler failure is retried with exponential
//! backoff while attempts remain; after that the job is copied to the
//! dead-letter store and marked failed. A job is only marked failed once its
//! dead-letter record is safely stored.
//!
//! A job redelivered because the lease on its final attempt ran out is
//! dead-lettered without running again. Settlements carry the delivery's
//! [`JobLease`](crate::domain::JobLease); a worker whose lease was taken over
//! drops its result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

use crate::domain::ports::{FailedJobRepositoryError, JobQueueError};
use crate::domain::{FailedJob, Job, JobId, JobPayload, QueueName};

mod handlers;
mod runtime;

pub use handlers::{
    ConfirmationHandler, HandledJob, JobHandlerError, ReminderHandler,
};
pub use runtime::{
    BackoffJitter, JobWorkerPorts, JobWorkerRuntime, RandomJitter, TokioSleeper, WorkerSleeper,
};

/// Worker pacing and parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobWorkerConfig {
    /// Jobs processed in parallel per queue.
    pub concurrency: usize,
    /// Sleep between polls when every queue is empty.
    pub poll_interval: Duration,
    /// How long a reserved job stays invisible to other workers.
    pub lease: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(30),
        }
    }
}

/// Result of processing one reserved job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        job_id: JobId,
        handled: HandledJob,
    },
    Retrying {
        job_id: JobId,
        attempt: u32,
        run_at: DateTime<Utc>,
    },
    DeadLettered {
        job_id: JobId,
        attempts: u32,
    },
    /// The lease ran out before the worker reported back and the job was
    /// redelivered; this delivery's result was discarded.
    LeaseLost {
        job_id: JobId,
        attempt: u32,
    },
}

/// Infrastructure failures that stop a job from being settled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobWorkerError {
    #[error(transparent)]
    Queue(#[from] JobQueueError),
    #[error(transparent)]
    DeadLetter(#[from] FailedJobRepositoryError),
}

/// Leases jobs from every queue, runs the matching handler and settles the
/// delivery.
///
/// Shared behind an `Arc`; [`JobWorker::run`] takes `self: Arc<Self>`.
pub struct JobWorker {
    ports: JobWorkerPorts,
    runtime: JobWorkerRuntime,
    config: JobWorkerConfig,
    confirmations: ConfirmationHandler,
    reminders: ReminderHandler,
}

impl JobWorker {
    /// Build a worker and its confirmation and reminder handlers.
    pub fn new(ports: JobWorkerPorts, runtime: JobWorkerRuntime, config: JobWorkerConfig) -> Self {
        let confirmations = ConfirmationHandler::new(
            Arc::clone(&ports.ledger),
            Arc::clone(&ports.mailbox),
            Arc::clone(&runtime.clock),
        );
        let reminders = ReminderHandler::new(
            Arc::clone(&ports.ledger),
            Arc::clone(&ports.mailbox),
            Arc::clone(&runtime.clock),
        );
        Self {
            ports,
            runtime,
            config,
            confirmations,
            reminders,
        }
    }

    /// Reserve and settle at most one job from `queue`.
    ///
    /// Returns `Ok(None)` when nothing is eligible.
    pub async fn process_next(
        &self,
        queue: QueueName,
    ) -> Result<Option<JobOutcome>, JobWorkerError> {
        let now = self.runtime.clock.utc();
        let lease_until = add_duration(now, self.config.lease);
        let Some(job) = self.ports.queue.reserve(queue, now, lease_until).await? else {
            return Ok(None);
        };

        let span = info_span!(
            "job",
            job_id = %job.id,
            queue = %job.queue,
            job = job.payload.job_name(),
            attempt = job.attempts,
        );
        self.settle(job).instrument(span).await.map(Some)
    }

    async fn settle(&self, job: Job) -> Result<JobOutcome, JobWorkerError> {
        if job.lease_outlived_attempts() {
            let cause = JobHandlerError::permanent(format!(
                "lease expired on final attempt {}",
                job.options.max_attempts
            ));
            return self.dead_letter(&job, &cause, job.options.max_attempts).await;
        }

        let error = match self.dispatch(&job.payload).await {
            Ok(handled) => {
                let settled = self
                    .ports
                    .queue
                    .complete(job.lease(), self.runtime.clock.utc())
                    .await;
                if let Err(error) = settled {
                    return lease_lost(error);
                }
                info!(?handled, "job completed");
                return Ok(JobOutcome::Completed {
                    job_id: job.id,
                    handled,
                });
            }
            Err(error) => error,
        };

        if error.is_retryable() && job.has_attempts_left() {
            let now = self.runtime.clock.utc();
            let base = job.options.backoff.delay_for(job.attempts);
            let delay = self.runtime.jitter.jittered_delay(base, job.attempts, now);
            let run_at = add_duration(now, delay);
            let settled = self
                .ports
                .queue
                .retry_later(job.lease(), run_at, error.message())
                .await;
            if let Err(queue_error) = settled {
                return lease_lost(queue_error);
            }
            warn!(error = %error, retry_at = %run_at, "job attempt failed; retry scheduled");
            return Ok(JobOutcome::Retrying {
                job_id: job.id,
                attempt: job.attempts,
                run_at,
            });
        }

        self.dead_letter(&job, &error, job.attempts).await
    }

    async fn dispatch(&self, payload: &JobPayload) -> Result<HandledJob, JobHandlerError> {
        match payload {
            JobPayload::Confirmation(job) => self.confirmations.handle(job).await,
            JobPayload::Reminder(job) => self.reminders.handle(job).await,
        }
    }

    /// `attempts` is the number of deliveries that actually ran a handler.
    async fn dead_letter(
        &self,
        job: &Job,
        cause: &JobHandlerError,
        attempts: u32,
    ) -> Result<JobOutcome, JobWorkerError> {
        let now = self.runtime.clock.utc();
        let failed = FailedJob {
            job_id: job.id,
            queue: job.queue,
            payload: job.payload.clone(),
            error: cause.message().to_owned(),
            attempts,
            failed_at: now,
        };
        if let Err(store_error) = self.ports.failed_jobs.record(&failed).await {
            error!(error = %store_error, cause = %cause, "dead-letter write failed; job left leased");
            return Err(store_error.into());
        }
        let settled = self
            .ports
            .queue
            .mark_failed(job.lease(), cause.message(), now)
            .await;
        if let Err(queue_error) = settled {
            return lease_lost(queue_error);
        }
        error!(error = %cause, attempts, "job moved to dead-letter store");
        Ok(JobOutcome::DeadLettered {
            job_id: job.id,
            attempts,
        })
    }

    /// Poll every queue until `shutdown` flips to `true` or its sender drops.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "job worker started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.drain_once().await > 0 {
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.runtime.sleeper.sleep(self.config.poll_interval) => {}
            }
        }
        info!("job worker stopped");
    }

    /// Run up to `concurrency` reservations per queue in parallel.
    ///
    /// Returns the number of jobs settled.
    async fn drain_once(self: &Arc<Self>) -> usize {
        let mut tasks = JoinSet::new();
        for queue in QueueName::ALL {
            for _ in 0..self.config.concurrency.max(1) {
                let worker = Arc::clone(self);
                tasks.spawn(async move { worker.process_next(queue).await });
            }
        }

        let mut settled = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(_))) => settled += 1,
                Ok(Ok(None)) => {}
                Ok(Err(error)) => error!(error = %error, "job could not be settled"),
                Err(join_error) => error!(error = %join_error, "job task aborted"),
            }
        }
        settled
    }
}

/// A settle rejected as stale means another worker owns the job now; its
/// outcome stands and this one is dropped.
fn lease_lost(error: JobQueueError) -> Result<JobOutcome, JobWorkerError> {
    match error {
        JobQueueError::StaleLease { job_id, attempt } => {
            warn!(attempt, "lease lost before settling; result discarded");
            Ok(JobOutcome::LeaseLost { job_id, attempt })
        }
        other => Err(other.into()),
    }
}

fn add_duration(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
    instant.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests;
