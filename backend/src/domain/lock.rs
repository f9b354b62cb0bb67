//! Competition lock naming and a guard that always releases.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::CompetitionId;
use super::ports::{LockManager, LockManagerError};

/// Name of a distributed lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Lock serialising seat claims for one competition.
    pub fn competition(id: CompetitionId) -> Self {
        Self(format!("lock:competition:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random value proving lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Held lock that is released explicitly or, failing that, on drop.
///
/// Dropping an unreleased guard spawns the release on the current Tokio
/// runtime so panics and early returns still free the lock before its TTL.
pub struct LockGuard {
    manager: Arc<dyn LockManager>,
    key: LockKey,
    owner: OwnerToken,
    released: bool,
}

impl LockGuard {
    /// Try to take `key` once. Returns `None` when another owner holds it.
    pub async fn try_acquire(
        manager: Arc<dyn LockManager>,
        key: LockKey,
        ttl: Duration,
    ) -> Result<Option<Self>, LockManagerError> {
        let owner = OwnerToken::random();
        if !manager.acquire(&key, &owner, ttl).await? {
            return Ok(None);
        }
        debug!(lock = %key, "lock acquired");
        Ok(Some(Self {
            manager,
            key,
            owner,
            released: false,
        }))
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release the lock if this guard still owns it.
    pub async fn release(mut self) {
        self.released = true;
        match self.manager.release(&self.key, &self.owner).await {
            Ok(true) => debug!(lock = %self.key, "lock released"),
            Ok(false) => warn!(lock = %self.key, "lock expired before release"),
            Err(error) => warn!(lock = %self.key, error = %error, "lock release failed"),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let key = self.key.clone();
        let owner = self.owner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = manager.release(&key, &owner).await {
                        warn!(lock = %key, error = %error, "deferred lock release failed");
                    }
                });
            }
            Err(_) => warn!(lock = %self.key, "no runtime to release lock; waiting for TTL"),
        }
    }
}
