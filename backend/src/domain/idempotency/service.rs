//! Two-tier idempotency store.
//!
//! Lookups try the volatile cache first and fall back to the durable
//! repository, repopulating the cache on a durable hit. Writes go to both
//! tiers and never overwrite an existing entry. Cache failures degrade to the
//! durable tier; durable failures surface to the caller.

use std::sync::Arc;

use mockable::Clock;
use tracing::{debug, warn};

use super::{IdempotencyConfig, IdempotencyKey, IdempotencyRecord};
use crate::domain::Registration;
use crate::domain::ports::{IdempotencyCache, IdempotencyRepository, IdempotencyRepositoryError};

/// Stores and replays registration results by idempotency key.
#[derive(Clone)]
pub struct IdempotencyService {
    cache: Arc<dyn IdempotencyCache>,
    repository: Arc<dyn IdempotencyRepository>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

impl IdempotencyService {
    pub fn new(
        cache: Arc<dyn IdempotencyCache>,
        repository: Arc<dyn IdempotencyRepository>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            cache,
            repository,
            clock,
            config,
        }
    }

    pub fn config(&self) -> IdempotencyConfig {
        self.config
    }

    /// Return the stored result for `key`, if any tier still holds it.
    pub async fn check(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Registration>, IdempotencyRepositoryError> {
        match self.cache.get(key).await {
            Ok(Some(response)) => {
                debug!(key = %key.fingerprint(), tier = "cache", "idempotency hit");
                return Ok(Some(response));
            }
            Ok(None) => {}
            Err(error) => {
                warn!(key = %key.fingerprint(), error = %error, "idempotency cache lookup failed");
            }
        }

        let now = self.clock.utc();
        let Some(record) = self.repository.find(key).await? else {
            return Ok(None);
        };
        let Some(remaining) = record.remaining_ttl(now) else {
            debug!(key = %key.fingerprint(), "idempotency record expired");
            return Ok(None);
        };

        debug!(key = %key.fingerprint(), tier = "durable", "idempotency hit");
        if let Err(error) = self
            .cache
            .put_if_absent(key, &record.response, remaining)
            .await
        {
            warn!(key = %key.fingerprint(), error = %error, "idempotency cache repopulation failed");
        }
        Ok(Some(record.response))
    }

    /// Store `response` under `key` in both tiers unless already present.
    pub async fn store(
        &self,
        key: &IdempotencyKey,
        response: &Registration,
    ) -> Result<(), IdempotencyRepositoryError> {
        let record = IdempotencyRecord::new(
            key.clone(),
            response.clone(),
            self.clock.utc(),
            self.config.ttl(),
        );
        let inserted = self.repository.insert_if_absent(&record).await?;
        if !inserted {
            debug!(key = %key.fingerprint(), "idempotency record already present");
        }
        if let Err(error) = self
            .cache
            .put_if_absent(key, response, self.config.ttl())
            .await
        {
            warn!(key = %key.fingerprint(), error = %error, "idempotency cache write failed");
        }
        Ok(())
    }

    /// Remove expired durable records.
    pub async fn sweep_expired(&self) -> Result<u64, IdempotencyRepositoryError> {
        self.repository.delete_expired(self.clock.utc()).await
    }
}
