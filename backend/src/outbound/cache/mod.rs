//! Redis-backed volatile tier of the idempotency store.
//!
//! Entries live under `idempotency:{key}` as JSON and carry their own expiry,
//! so Redis evicts them without a sweep. Writes use `SET NX` to keep the first
//! stored result.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;
use tracing::debug;

use crate::domain::ports::{IdempotencyCache, IdempotencyCacheError};
use crate::domain::{IdempotencyKey, Registration};

use super::redis_pool::{RedisPool, ttl_millis};

/// Idempotency cache stored in Redis.
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    pool: RedisPool,
}

impl RedisIdempotencyCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

fn cache_key(key: &IdempotencyKey) -> String {
    format!("idempotency:{key}")
}

fn backend_error(error: impl std::fmt::Display) -> IdempotencyCacheError {
    IdempotencyCacheError::backend(error.to_string())
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Registration>, IdempotencyCacheError> {
        let mut conn = self.pool.get().await.map_err(backend_error)?;

        let cached: Option<String> = redis::cmd("GET")
            .arg(cache_key(key))
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)?;

        cached
            .map(|json| {
                serde_json::from_str(&json)
                    .map_err(|err| IdempotencyCacheError::serialization(err.to_string()))
            })
            .transpose()
    }

    async fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        response: &Registration,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        let json = serde_json::to_string(response)
            .map_err(|err| IdempotencyCacheError::serialization(err.to_string()))?;
        let mut conn = self.pool.get().await.map_err(backend_error)?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(cache_key(key))
            .arg(json)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)?;

        let stored = reply.is_some();
        debug!(key = %key.fingerprint(), stored, "idempotency cache write");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn keys_are_namespaced() {
        let key = IdempotencyKey::new("checkout-7781-retry").expect("valid key");
        assert_eq!(cache_key(&key), "idempotency:checkout-7781-retry");
    }
}
