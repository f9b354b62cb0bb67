//! Port for the volatile idempotency tier.
//!
//! The cache answers most retries without touching the durable store. Entries
//! carry their own expiry and are never overwritten once written.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{IdempotencyKey, Registration};

use super::define_port_error;

define_port_error! {
    /// Errors raised by idempotency cache adapters.
    pub enum IdempotencyCacheError {
        /// The cache backend could not be reached.
        Backend { message: String } => "idempotency cache backend failed: {message}",
        /// A cached payload could not be encoded or decoded.
        Serialization { message: String } => "idempotency cache serialization failed: {message}",
    }
}

/// Expiring key/value view of stored registration results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Return the cached result for `key`, if one is still live.
    async fn get(&self, key: &IdempotencyKey)
    -> Result<Option<Registration>, IdempotencyCacheError>;

    /// Store `response` under `key` for `ttl` unless an entry already exists.
    ///
    /// Returns `true` when this call wrote the entry.
    async fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        response: &Registration,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError>;
}

/// Cache that never holds anything.
#[derive(Debug, Default)]
pub struct FixtureIdempotencyCache;

#[async_trait]
impl IdempotencyCache for FixtureIdempotencyCache {
    async fn get(
        &self,
        _key: &IdempotencyKey,
    ) -> Result<Option<Registration>, IdempotencyCacheError> {
        Ok(None)
    }

    async fn put_if_absent(
        &self,
        _key: &IdempotencyKey,
        _response: &Registration,
        _ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        Ok(false)
    }
}
