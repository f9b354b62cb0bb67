//! Process-local lock manager with clock-driven expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{LockManager, LockManagerError};
use crate::domain::{LockKey, OwnerToken};

struct HeldLock {
    owner: OwnerToken,
    expires_at: DateTime<Utc>,
}

pub struct InMemoryLockManager {
    locks: Mutex<HashMap<LockKey, HeldLock>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Whether a live lock is held on `key`.
    pub fn is_locked(&self, key: &LockKey) -> bool {
        let now = self.clock.utc();
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.get(key).is_some_and(|held| held.expires_at > now)
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(
        &self,
        key: &LockKey,
        owner: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool, LockManagerError> {
        let now = self.clock.utc();
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|error| LockManagerError::backend(format!("invalid ttl: {error}")))?;
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|held| held.expires_at > now) {
            return Ok(false);
        }
        locks.insert(
            key.clone(),
            HeldLock {
                owner: owner.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &LockKey, owner: &OwnerToken) -> Result<bool, LockManagerError> {
        let now = self.clock.utc();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = locks
            .get(key)
            .is_some_and(|held| held.owner == *owner && held.expires_at > now);
        if owned {
            locks.remove(key);
        }
        Ok(owned)
    }
}
