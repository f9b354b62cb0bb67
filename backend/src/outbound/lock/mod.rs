//! Redis-backed distributed lock manager.
//!
//! Acquisition is `SET key token NX PX ttl`. Release `EVAL`s a Lua
//! compare-and-delete so an owner whose lease lapsed can never remove a lock
//! that another owner has since taken.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;
use tracing::debug;

use crate::domain::ports::{LockManager, LockManagerError};
use crate::domain::{LockKey, OwnerToken};

use super::redis_pool::{RedisPool, ttl_millis};

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Lock manager backed by single-instance Redis.
#[derive(Clone)]
pub struct RedisLockManager {
    pool: RedisPool,
}

impl RedisLockManager {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

fn backend_error(error: impl std::fmt::Display) -> LockManagerError {
    LockManagerError::backend(error.to_string())
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(
        &self,
        key: &LockKey,
        owner: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool, LockManagerError> {
        let mut conn = self.pool.get().await.map_err(backend_error)?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(owner.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)?;

        let acquired = reply.is_some();
        debug!(lock = %key, acquired, "lock acquisition attempted");
        Ok(acquired)
    }

    async fn release(&self, key: &LockKey, owner: &OwnerToken) -> Result<bool, LockManagerError> {
        let mut conn = self.pool.get().await.map_err(backend_error)?;

        let deleted: i64 = redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(key.as_str())
            .arg(owner.as_str())
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)?;
        Ok(deleted == 1)
    }
}
