//! PostgreSQL-backed dead-letter store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::ports::{FailedJobRepository, FailedJobRepositoryError};
use crate::domain::{FailedJob, JobId, JobPayload, QueueName};

use super::diesel_basic_error_mapping::{map_basic_diesel_error, map_basic_pool_error};
use super::models::FailedJobRow;
use super::pool::{DbPool, PoolError};
use super::schema::failed_jobs;

/// Diesel-backed implementation of the `FailedJobRepository` port.
#[derive(Clone)]
pub struct DieselFailedJobRepository {
    pool: DbPool,
}

impl DieselFailedJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> FailedJobRepositoryError {
    map_basic_pool_error(error, FailedJobRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> FailedJobRepositoryError {
    map_basic_diesel_error(
        error,
        FailedJobRepositoryError::query,
        FailedJobRepositoryError::connection,
    )
}

fn to_row(job: &FailedJob) -> Result<FailedJobRow, FailedJobRepositoryError> {
    let payload = serde_json::to_value(&job.payload)
        .map_err(|err| FailedJobRepositoryError::serialization(err.to_string()))?;
    Ok(FailedJobRow {
        job_id: *job.job_id.as_uuid(),
        queue: job.queue.as_str().to_owned(),
        payload,
        error: job.error.clone(),
        attempts: i32::try_from(job.attempts).unwrap_or(i32::MAX),
        failed_at: job.failed_at,
    })
}

fn row_to_failed_job(row: FailedJobRow) -> Result<FailedJob, FailedJobRepositoryError> {
    let queue = QueueName::from_str(&row.queue)
        .map_err(|err| FailedJobRepositoryError::serialization(err.to_string()))?;
    let payload: JobPayload = serde_json::from_value(row.payload)
        .map_err(|err| FailedJobRepositoryError::serialization(err.to_string()))?;
    Ok(FailedJob {
        job_id: JobId::from_uuid(row.job_id),
        queue,
        payload,
        error: row.error,
        attempts: u32::try_from(row.attempts).unwrap_or(0),
        failed_at: row.failed_at,
    })
}

#[async_trait]
impl FailedJobRepository for DieselFailedJobRepository {
    async fn record(&self, job: &FailedJob) -> Result<bool, FailedJobRepositoryError> {
        let row = to_row(job)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let inserted = diesel::insert_into(failed_jobs::table)
            .values(&row)
            .on_conflict(failed_jobs::job_id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(inserted > 0)
    }

    async fn list(&self, limit: u32) -> Result<Vec<FailedJob>, FailedJobRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<FailedJobRow> = failed_jobs::table
            .order(failed_jobs::failed_at.desc())
            .limit(i64::from(limit))
            .select(FailedJobRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_failed_job).collect()
    }

    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, FailedJobRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let deleted = diesel::delete(failed_jobs::table)
            .filter(failed_jobs::failed_at.lt(cutoff))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        debug!(deleted, cutoff = %cutoff, "purged dead-lettered jobs");
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}
