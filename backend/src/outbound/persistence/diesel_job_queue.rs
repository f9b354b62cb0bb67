//! PostgreSQL-backed `JobQueue` implementation.
//!
//! Jobs for every queue live in one `jobs` table. Reservation leases a row
//! with `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive the same
//! job while its lease holds. An `active` row whose lease lapsed is eligible
//! again, which recovers jobs from crashed workers.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::warn;

use crate::domain::ports::{JobQueue, JobQueueError};
use crate::domain::{
    BackoffPolicy, Job, JobId, JobLease, JobOptions, JobPayload, JobState, NewJob, QueueName,
    QueueStats,
};

use super::diesel_basic_error_mapping::{map_basic_diesel_error, map_basic_pool_error};
use super::models::{JobRow, NewJobRow};
use super::pool::{DbPool, PoolError};
use super::schema::{jobs, paused_queues};

const RESERVE_SQL: &str = r#"
UPDATE jobs
SET state = 'active', attempts = attempts + 1, lease_until = $3
WHERE id = (
    SELECT id FROM jobs
    WHERE queue = $1
      AND NOT EXISTS (SELECT 1 FROM paused_queues WHERE paused_queues.queue = $1)
      AND ((state = 'waiting' AND run_at <= $2)
           OR (state = 'active' AND lease_until <= $2))
    ORDER BY run_at, created_at
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
RETURNING id, queue, payload, attempts, max_attempts, backoff_base_ms, backoff_max_ms, created_at
"#;

/// Diesel-backed durable job queue.
#[derive(Clone)]
pub struct DieselJobQueue {
    pool: DbPool,
}

impl DieselJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> JobQueueError {
    map_basic_pool_error(error, JobQueueError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> JobQueueError {
    map_basic_diesel_error(error, JobQueueError::query, JobQueueError::connection)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn row_to_job(row: JobRow) -> Result<Job, JobQueueError> {
    let queue = QueueName::from_str(&row.queue)
        .map_err(|err| JobQueueError::serialization(err.to_string()))?;
    let payload: JobPayload = serde_json::from_value(row.payload)
        .map_err(|err| JobQueueError::serialization(format!("undecodable payload: {err}")))?;
    let non_negative = |value: i64| Duration::from_millis(u64::try_from(value).unwrap_or(0));
    Ok(Job {
        id: JobId::from_uuid(row.id),
        queue,
        payload,
        options: JobOptions {
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
            backoff: BackoffPolicy {
                base: non_negative(row.backoff_base_ms),
                max: non_negative(row.backoff_max_ms),
            },
        },
        attempts: u32::try_from(row.attempts).unwrap_or(0),
        created_at: row.created_at,
    })
}

fn lease_attempt(lease: JobLease) -> i32 {
    i32::try_from(lease.attempt).unwrap_or(i32::MAX)
}

/// Classify a settle that matched no active row for `lease`.
fn missed_settlement(lease: JobLease, rows_for_id: i64) -> JobQueueError {
    if rows_for_id == 0 {
        JobQueueError::unknown_job(lease.job_id)
    } else {
        JobQueueError::stale_lease(lease.job_id, lease.attempt)
    }
}

async fn ensure_settled(
    conn: &mut AsyncPgConnection,
    lease: JobLease,
    updated: usize,
) -> Result<(), JobQueueError> {
    if updated > 0 {
        return Ok(());
    }
    let rows_for_id: i64 = jobs::table
        .find(*lease.job_id.as_uuid())
        .count()
        .get_result(conn)
        .await
        .map_err(map_diesel_error)?;
    Err(missed_settlement(lease, rows_for_id))
}

#[async_trait]
impl JobQueue for DieselJobQueue {
    async fn enqueue(&self, job: &NewJob) -> Result<JobId, JobQueueError> {
        let payload = serde_json::to_value(&job.payload)
            .map_err(|err| JobQueueError::serialization(err.to_string()))?;
        let new_row = NewJobRow {
            id: *job.id.as_uuid(),
            queue: job.queue().as_str(),
            payload: &payload,
            state: JobState::Waiting.as_str(),
            attempts: 0,
            max_attempts: i32::try_from(job.options.max_attempts).unwrap_or(i32::MAX),
            backoff_base_ms: millis(job.options.backoff.base),
            backoff_max_ms: millis(job.options.backoff.max),
            run_at: job.run_at,
            created_at: job.created_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        diesel::insert_into(jobs::table)
            .values(&new_row)
            .on_conflict(jobs::id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(job.id)
    }

    async fn reserve(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Job>, JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<JobRow> = diesel::sql_query(RESERVE_SQL)
            .bind::<Text, _>(queue.as_str())
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(lease_until)
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let id = JobId::from_uuid(row.id);
        match row_to_job(row) {
            Ok(job) => Ok(Some(job)),
            Err(error) => {
                // A payload no handler can read would be redelivered forever.
                warn!(job_id = %id, %queue, error = %error, "failing undecodable job");
                let message = error.to_string();
                diesel::update(jobs::table.find(*id.as_uuid()))
                    .set((
                        jobs::state.eq(JobState::Failed.as_str()),
                        jobs::lease_until.eq(None::<DateTime<Utc>>),
                        jobs::last_error.eq(Some(message.as_str())),
                        jobs::finished_at.eq(Some(now)),
                    ))
                    .execute(&mut conn)
                    .await
                    .map_err(map_diesel_error)?;
                Err(error)
            }
        }
    }

    async fn complete(&self, lease: JobLease, now: DateTime<Utc>) -> Result<(), JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(jobs::table.find(*lease.job_id.as_uuid()))
            .filter(jobs::state.eq(JobState::Active.as_str()))
            .filter(jobs::attempts.eq(lease_attempt(lease)))
            .set((
                jobs::state.eq(JobState::Completed.as_str()),
                jobs::lease_until.eq(None::<DateTime<Utc>>),
                jobs::finished_at.eq(Some(now)),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        ensure_settled(&mut conn, lease, updated).await
    }

    async fn retry_later(
        &self,
        lease: JobLease,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(jobs::table.find(*lease.job_id.as_uuid()))
            .filter(jobs::state.eq(JobState::Active.as_str()))
            .filter(jobs::attempts.eq(lease_attempt(lease)))
            .set((
                jobs::state.eq(JobState::Waiting.as_str()),
                jobs::run_at.eq(run_at),
                jobs::lease_until.eq(None::<DateTime<Utc>>),
                jobs::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        ensure_settled(&mut conn, lease, updated).await
    }

    async fn mark_failed(
        &self,
        lease: JobLease,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(jobs::table.find(*lease.job_id.as_uuid()))
            .filter(jobs::state.eq(JobState::Active.as_str()))
            .filter(jobs::attempts.eq(lease_attempt(lease)))
            .set((
                jobs::state.eq(JobState::Failed.as_str()),
                jobs::lease_until.eq(None::<DateTime<Utc>>),
                jobs::last_error.eq(Some(error)),
                jobs::finished_at.eq(Some(now)),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        ensure_settled(&mut conn, lease, updated).await
    }

    async fn stats(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<QueueStats, JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let counts: Vec<(String, i64)> = jobs::table
            .filter(jobs::queue.eq(queue.as_str()))
            .group_by(jobs::state)
            .select((jobs::state, diesel::dsl::count_star()))
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        let delayed: i64 = jobs::table
            .filter(jobs::queue.eq(queue.as_str()))
            .filter(jobs::state.eq(JobState::Waiting.as_str()))
            .filter(jobs::run_at.gt(now))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        let paused: i64 = paused_queues::table
            .filter(paused_queues::queue.eq(queue.as_str()))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let as_count = |value: i64| u64::try_from(value).unwrap_or(0);
        let mut stats = QueueStats {
            paused: paused > 0,
            delayed: as_count(delayed),
            ..QueueStats::default()
        };
        for (state, count) in counts {
            match JobState::from_str(&state) {
                Ok(JobState::Waiting) => {
                    stats.waiting = as_count(count).saturating_sub(stats.delayed);
                }
                Ok(JobState::Active) => stats.active = as_count(count),
                Ok(JobState::Completed) => stats.completed = as_count(count),
                Ok(JobState::Failed) => stats.failed = as_count(count),
                Err(err) => warn!(%queue, error = %err, "ignoring unknown job state"),
            }
        }
        Ok(stats)
    }

    async fn pause(&self, queue: QueueName) -> Result<(), JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(paused_queues::table)
            .values(paused_queues::queue.eq(queue.as_str()))
            .on_conflict(paused_queues::queue)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(())
    }

    async fn resume(&self, queue: QueueName) -> Result<(), JobQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::delete(paused_queues::table.find(queue.as_str()))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
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
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(jobs::table)
            .filter(jobs::queue.eq(queue.as_str()))
            .filter(jobs::state.eq(state.as_str()))
            .filter(jobs::finished_at.lt(older_than))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}
