//! Port for the durable idempotency tier.
//!
//! The repository is the authority when the cache has lost an entry. Records
//! past their expiry are treated as absent and may be replaced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{IdempotencyKey, IdempotencyRecord};

use super::define_port_error;

define_port_error! {
    /// Errors raised by idempotency repository adapters.
    pub enum IdempotencyRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "idempotency repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "idempotency repository query failed: {message}",
        /// Stored response could not be encoded or decoded.
        Serialization { message: String } => "idempotency repository serialization failed: {message}",
    }
}

/// Durable storage of registration results keyed by idempotency key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Fetch the record stored for `key`, expired or not.
    async fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyRepositoryError>;

    /// Insert `record` unless a live record already holds the key.
    ///
    /// A record whose `expires_at` is at or before `record.created_at` is
    /// replaced. Returns `true` when this call stored the record.
    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<bool, IdempotencyRepositoryError>;

    /// Delete every record that expired at or before `now`.
    ///
    /// Returns the number of records deleted.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError>;
}

/// Repository that stores nothing and finds nothing.
#[derive(Debug, Default)]
pub struct FixtureIdempotencyRepository;

#[async_trait]
impl IdempotencyRepository for FixtureIdempotencyRepository {
    async fn find(
        &self,
        _key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyRepositoryError> {
        Ok(None)
    }

    async fn insert_if_absent(
        &self,
        _record: &IdempotencyRecord,
    ) -> Result<bool, IdempotencyRepositoryError> {
        Ok(true)
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError> {
        Ok(0)
    }
}
