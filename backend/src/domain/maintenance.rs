//! Scheduled housekeeping: reminder fan-out and retention sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tracing::{info, warn};

use super::ports::{
    CompetitionLedger, CompetitionLedgerError, FailedJobRepository, FailedJobRepositoryError,
    IdempotencyRepositoryError, JobQueue, JobQueueError,
};
use super::{IdempotencyService, JobOptions, JobPayload, NewJob, ReminderJob};

/// Errors raised by maintenance runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Ledger(#[from] CompetitionLedgerError),
    #[error(transparent)]
    Queue(#[from] JobQueueError),
    #[error(transparent)]
    Idempotency(#[from] IdempotencyRepositoryError),
    #[error(transparent)]
    FailedJobs(#[from] FailedJobRepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// How far ahead of a start date reminders go out.
    pub reminder_window: Duration,
    /// Dead-letter records older than this are purged.
    pub failed_job_retention: Duration,
    pub reminder_job: JobOptions,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reminder_window: Duration::from_secs(24 * 3600),
            failed_job_retention: Duration::from_secs(30 * 24 * 3600),
            reminder_job: JobOptions::default(),
        }
    }
}

/// Counts removed by one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub idempotency_records: u64,
    pub failed_jobs: u64,
}

pub struct MaintenanceService {
    ledger: Arc<dyn CompetitionLedger>,
    queue: Arc<dyn JobQueue>,
    failed_jobs: Arc<dyn FailedJobRepository>,
    idempotency: IdempotencyService,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
}

impl MaintenanceService {
    pub fn new(
        ledger: Arc<dyn CompetitionLedger>,
        queue: Arc<dyn JobQueue>,
        failed_jobs: Arc<dyn FailedJobRepository>,
        idempotency: IdempotencyService,
        clock: Arc<dyn Clock>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            ledger,
            queue,
            failed_jobs,
            idempotency,
            clock,
            config,
        }
    }

    /// Enqueue one reminder per confirmed registration whose competition
    /// starts within the reminder window.
    ///
    /// Running this twice inside one window enqueues duplicate reminders.
    /// Returns the number of jobs enqueued.
    pub async fn enqueue_upcoming_reminders(&self) -> Result<usize, MaintenanceError> {
        let now = self.clock.utc();
        let window = TimeDelta::from_std(self.config.reminder_window).unwrap_or(TimeDelta::MAX);
        let until = now
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let upcoming = self.ledger.confirmed_starting_between(now, until).await?;

        let mut enqueued = 0;
        for details in &upcoming {
            let Some(reminder) = ReminderJob::for_details(details) else {
                continue;
            };
            let job = NewJob::immediate(
                JobPayload::Reminder(reminder),
                self.config.reminder_job,
                now,
            );
            self.queue.enqueue(&job).await?;
            enqueued += 1;
        }
        info!(enqueued, window_end = %until, "reminder jobs enqueued");
        Ok(enqueued)
    }

    /// Delete expired idempotency records and stale dead-letter records.
    pub async fn sweep(&self) -> Result<SweepReport, MaintenanceError> {
        let now = self.clock.utc();
        let idempotency_records = self.idempotency.sweep_expired().await?;
        let retention = TimeDelta::from_std(self.config.failed_job_retention).unwrap_or(TimeDelta::MAX);
        // A retention reaching past the calendar keeps every record.
        let cutoff = now
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let failed_jobs = match self.failed_jobs.purge_older_than(cutoff).await {
            Ok(count) => count,
            Err(error) => {
                warn!(error = %error, "dead-letter purge failed");
                return Err(error.into());
            }
        };
        let report = SweepReport {
            idempotency_records,
            failed_jobs,
        };
        info!(
            idempotency_records = report.idempotency_records,
            failed_jobs = report.failed_jobs,
            "maintenance sweep finished"
        );
        Ok(report)
    }
}
