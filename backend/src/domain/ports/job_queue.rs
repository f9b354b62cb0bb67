//! Port for durable, at-least-once job delivery.
//!
//! Adapters never hand the same job to two workers at once: a reserved job is
//! leased until `lease_until`, and only becomes deliverable again if the lease
//! runs out before the worker reports back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobLease, JobState, NewJob, QueueName, QueueStats};

use super::define_port_error;

define_port_error! {
    /// Errors raised by job queue adapters.
    pub enum JobQueueError {
        /// Queue backend connection could not be established.
        Connection { message: String } => "job queue connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "job queue query failed: {message}",
        /// Stored payload could not be encoded or decoded.
        Serialization { message: String } => "job queue serialization failed: {message}",
        /// No job exists with the given id.
        UnknownJob { job_id: JobId } => "job {job_id} not found",
        /// The job is no longer active on the attempt being settled.
        StaleLease { job_id: JobId, attempt: u32 } =>
            "lease on job {job_id} for attempt {attempt} is no longer held",
    }
}

/// Durable work queue with leases, delayed retries and pausing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a job for delivery on its queue.
    async fn enqueue(&self, job: &NewJob) -> Result<JobId, JobQueueError>;

    /// Lease the next job eligible at `now`, counting one more attempt.
    ///
    /// Returns `None` when the queue is paused or nothing is eligible.
    async fn reserve(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>, JobQueueError>;

    /// Mark a leased job as completed.
    ///
    /// Every settle call fails with `StaleLease` unless the job is still
    /// active on `lease.attempt`.
    async fn complete(&self, lease: JobLease, now: DateTime<Utc>) -> Result<(), JobQueueError>;

    /// Release a leased job for another attempt at `run_at`.
    async fn retry_later(
        &self,
        lease: JobLease,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), JobQueueError>;

    /// Mark a leased job as permanently failed.
    async fn mark_failed(
        &self,
        lease: JobLease,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError>;

    /// Count jobs per state for `queue` as seen at `now`.
    async fn stats(&self, queue: QueueName, now: DateTime<Utc>)
    -> Result<QueueStats, JobQueueError>;

    /// Stop delivering jobs from `queue`. Enqueueing still succeeds.
    async fn pause(&self, queue: QueueName) -> Result<(), JobQueueError>;

    async fn resume(&self, queue: QueueName) -> Result<(), JobQueueError>;

    /// Delete jobs in `state` that finished before `older_than`.
    ///
    /// Only `Completed` and `Failed` are removable; other states delete
    /// nothing. Returns the number of jobs removed.
    async fn clean(
        &self,
        queue: QueueName,
        state: JobState,
        older_than: DateTime<Utc>,
    ) -> Result<u64, JobQueueError>;
}
