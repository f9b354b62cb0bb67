//! Process-local job queue with leases and delayed retries.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ports::{JobQueue, JobQueueError};
use crate::domain::{
    Job, JobId, JobLease, JobOptions, JobPayload, JobState, NewJob, QueueName, QueueStats,
};

struct StoredJob {
    id: JobId,
    queue: QueueName,
    payload: JobPayload,
    options: JobOptions,
    state: JobState,
    attempts: u32,
    run_at: DateTime<Utc>,
    lease_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl StoredJob {
    fn deliverable_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => self.run_at <= now,
            JobState::Active => self.lease_until.is_some_and(|until| until <= now),
            JobState::Completed | JobState::Failed => false,
        }
    }
}

/// Read-only view of a stored job for assertions and operator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts: u32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct QueueTables {
    /// Enqueue order breaks `run_at` ties.
    jobs: Vec<StoredJob>,
    paused: HashSet<QueueName>,
}

#[derive(Default)]
pub struct InMemoryJobQueue {
    tables: Mutex<QueueTables>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self, queue: QueueName) -> Vec<JobSnapshot> {
        self.lock()
            .jobs
            .iter()
            .filter(|job| job.queue == queue)
            .map(|job| JobSnapshot {
                id: job.id,
                queue: job.queue,
                payload: job.payload.clone(),
                state: job.state,
                attempts: job.attempts,
                run_at: job.run_at,
                last_error: job.last_error.clone(),
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn leased_job(
    tables: &mut QueueTables,
    lease: JobLease,
) -> Result<&mut StoredJob, JobQueueError> {
    let job = tables
        .jobs
        .iter_mut()
        .find(|job| job.id == lease.job_id)
        .ok_or_else(|| JobQueueError::unknown_job(lease.job_id))?;
    if job.state != JobState::Active || job.attempts != lease.attempt {
        return Err(JobQueueError::stale_lease(lease.job_id, lease.attempt));
    }
    Ok(job)
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &NewJob) -> Result<JobId, JobQueueError> {
        let mut tables = self.lock();
        if tables.jobs.iter().any(|stored| stored.id == job.id) {
            return Ok(job.id);
        }
        tables.jobs.push(StoredJob {
            id: job.id,
            queue: job.queue(),
            payload: job.payload.clone(),
            options: job.options,
            state: JobState::Waiting,
            attempts: 0,
            run_at: job.run_at,
            lease_until: None,
            last_error: None,
            created_at: job.created_at,
            finished_at: None,
        });
        Ok(job.id)
    }

    async fn reserve(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>, JobQueueError> {
        let mut tables = self.lock();
        if tables.paused.contains(&queue) {
            return Ok(None);
        }
        let next = tables
            .jobs
            .iter_mut()
            .filter(|job| job.queue == queue && job.deliverable_at(now))
            .min_by_key(|job| job.run_at);
        let Some(job) = next else {
            return Ok(None);
        };
        job.state = JobState::Active;
        job.attempts = job.attempts.saturating_add(1);
        job.lease_until = Some(lease_until);
        Ok(Some(Job {
            id: job.id,
            queue: job.queue,
            payload: job.payload.clone(),
            options: job.options,
            attempts: job.attempts,
            created_at: job.created_at,
        }))
    }

    async fn complete(&self, lease: JobLease, now: DateTime<Utc>) -> Result<(), JobQueueError> {
        let mut tables = self.lock();
        let job = leased_job(&mut tables, lease)?;
        job.state = JobState::Completed;
        job.lease_until = None;
        job.finished_at = Some(now);
        Ok(())
    }

    async fn retry_later(
        &self,
        lease: JobLease,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), JobQueueError> {
        let mut tables = self.lock();
        let job = leased_job(&mut tables, lease)?;
        job.state = JobState::Waiting;
        job.run_at = run_at;
        job.lease_until = None;
        job.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn mark_failed(
        &self,
        lease: JobLease,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        let mut tables = self.lock();
        let job = leased_job(&mut tables, lease)?;
        job.state = JobState::Failed;
        job.lease_until = None;
        job.last_error = Some(error.to_owned());
        job.finished_at = Some(now);
        Ok(())
    }

    async fn stats(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<QueueStats, JobQueueError> {
        let tables = self.lock();
        let mut stats = QueueStats {
            paused: tables.paused.contains(&queue),
            ..QueueStats::default()
        };
        for job in tables.jobs.iter().filter(|job| job.queue == queue) {
            match job.state {
                JobState::Waiting if job.run_at > now => stats.delayed += 1,
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn pause(&self, queue: QueueName) -> Result<(), JobQueueError> {
        self.lock().paused.insert(queue);
        Ok(())
    }

    async fn resume(&self, queue: QueueName) -> Result<(), JobQueueError> {
        self.lock().paused.remove(&queue);
        Ok(())
    }

    async fn clean(
        &self,
        queue: QueueName,
        state: JobState,
        older_than: DateTime<Utc>,
    ) -> Result<u64, JobQueueError> {
        if !matches!(state, JobState::Completed | JobState::Failed) {
            return Ok(0);
        }
        let mut tables = self.lock();
        let before = tables.jobs.len();
        tables.jobs.retain(|job| {
            !(job.queue == queue
                && job.state == state
                && job.finished_at.is_some_and(|at| at < older_than))
        });
        Ok(u64::try_from(before - tables.jobs.len()).unwrap_or(u64::MAX))
    }
}
