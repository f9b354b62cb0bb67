//! PostgreSQL-backed `IdempotencyRepository` implementation using Diesel ORM.
//!
//! The durable tier outlives cache flushes. Lookups return expired rows as
//! well; callers decide liveness against their own clock. Expired rows are
//! replaced on insert and removed by `delete_expired`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::query_dsl::methods::FilterDsl;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::ports::{IdempotencyRepository, IdempotencyRepositoryError};
use crate::domain::{IdempotencyKey, IdempotencyRecord, Registration};

use super::diesel_basic_error_mapping::{map_basic_diesel_error, map_basic_pool_error};
use super::models::{IdempotencyRecordRow, NewIdempotencyRecordRow};
use super::pool::{DbPool, PoolError};
use super::schema::idempotency_records;

/// Diesel-backed implementation of the `IdempotencyRepository` port.
#[derive(Clone)]
pub struct DieselIdempotencyRepository {
    pool: DbPool,
}

impl DieselIdempotencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> IdempotencyRepositoryError {
    map_basic_pool_error(error, IdempotencyRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> IdempotencyRepositoryError {
    map_basic_diesel_error(
        error,
        IdempotencyRepositoryError::query,
        IdempotencyRepositoryError::connection,
    )
}

fn row_to_record(row: IdempotencyRecordRow) -> Result<IdempotencyRecord, IdempotencyRepositoryError> {
    let key = IdempotencyKey::new(row.key).map_err(|err| {
        IdempotencyRepositoryError::query(format!("invalid idempotency key in database: {err}"))
    })?;
    let response: Registration = serde_json::from_value(row.response).map_err(|err| {
        IdempotencyRepositoryError::serialization(format!("corrupted stored response: {err}"))
    })?;
    Ok(IdempotencyRecord {
        key,
        response,
        created_at: row.created_at,
        expires_at: row.expires_at,
    })
}

#[async_trait]
impl IdempotencyRepository for DieselIdempotencyRepository {
    async fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<IdempotencyRecordRow> = idempotency_records::table
            .find(key.as_ref())
            .select(IdempotencyRecordRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(row_to_record).transpose()
    }

    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<bool, IdempotencyRepositoryError> {
        let response = serde_json::to_value(&record.response).map_err(|err| {
            IdempotencyRepositoryError::serialization(format!("response not serialisable: {err}"))
        })?;
        let new_row = NewIdempotencyRecordRow {
            key: record.key.as_ref(),
            response: &response,
            created_at: record.created_at,
            expires_at: record.expires_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        // A live row wins; an expired one is overwritten in place.
        let upsert = diesel::insert_into(idempotency_records::table)
            .values(&new_row)
            .on_conflict(idempotency_records::key)
            .do_update()
            .set((
                idempotency_records::response.eq(excluded(idempotency_records::response)),
                idempotency_records::created_at.eq(excluded(idempotency_records::created_at)),
                idempotency_records::expires_at.eq(excluded(idempotency_records::expires_at)),
            ));
        let inserted = FilterDsl::filter(
            upsert,
            idempotency_records::expires_at.le(excluded(idempotency_records::created_at)),
        )
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(inserted > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let deleted = diesel::delete(idempotency_records::table)
            .filter(idempotency_records::expires_at.le(now))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        debug!(deleted, cutoff = %now, "deleted expired idempotency records");
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}
