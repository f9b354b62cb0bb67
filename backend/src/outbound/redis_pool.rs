//! Shared bb8 pool for the Redis adapters.

use std::time::Duration;

use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::Pool;

/// Pool shared by the idempotency cache and the lock manager.
pub type RedisPool = Pool<RedisConnectionManager>;

/// Errors raised while building the Redis pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedisPoolError {
    #[error("invalid redis url: {message}")]
    InvalidUrl { message: String },
    #[error("failed to build redis pool: {message}")]
    Build { message: String },
}

/// Build a pool for `redis_url` with `max_size` connections.
///
/// Connections are opened lazily; an unreachable server surfaces on first
/// checkout rather than here.
pub async fn build_redis_pool(redis_url: &str, max_size: u32) -> Result<RedisPool, RedisPoolError> {
    let manager = RedisConnectionManager::new(redis_url).map_err(|err| {
        RedisPoolError::InvalidUrl {
            message: err.to_string(),
        }
    })?;
    Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(Duration::from_secs(2))
        .build(manager)
        .await
        .map_err(|err| RedisPoolError::Build {
            message: err.to_string(),
        })
}

/// Milliseconds for `PX`, never zero so the key always expires.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::ZERO, 1)]
    #[case(Duration::from_micros(500), 1)]
    #[case(Duration::from_secs(5), 5_000)]
    fn ttl_is_at_least_one_millisecond(#[case] ttl: Duration, #[case] expected: u64) {
        assert_eq!(ttl_millis(ttl), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let result = build_redis_pool("not a url", 4).await;
        assert!(matches!(result, Err(RedisPoolError::InvalidUrl { .. })));
    }
}
