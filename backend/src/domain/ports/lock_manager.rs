//! Port for short-lived distributed mutual exclusion.
//!
//! A lock is held by whoever presents the owner token it was acquired with.
//! Locks expire on their own after the TTL so a crashed holder cannot wedge a
//! competition.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{LockKey, OwnerToken};

use super::define_port_error;

define_port_error! {
    /// Errors raised by lock manager adapters.
    pub enum LockManagerError {
        /// The lock backend could not be reached.
        Backend { message: String } => "lock backend failed: {message}",
    }
}

/// Non-blocking try-lock with owner-checked release.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Set `key` to `owner` with expiry `ttl` only if no live lock exists.
    ///
    /// Returns `false` immediately when another owner holds the key.
    async fn acquire(
        &self,
        key: &LockKey,
        owner: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool, LockManagerError>;

    /// Delete `key` only if it still holds `owner`.
    ///
    /// Returns `true` when the lock was deleted by this call.
    async fn release(&self, key: &LockKey, owner: &OwnerToken) -> Result<bool, LockManagerError>;
}

/// Lock manager that always grants and releases.
#[derive(Debug, Default)]
pub struct FixtureLockManager;

#[async_trait]
impl LockManager for FixtureLockManager {
    async fn acquire(
        &self,
        _key: &LockKey,
        _owner: &OwnerToken,
        _ttl: Duration,
    ) -> Result<bool, LockManagerError> {
        Ok(true)
    }

    async fn release(&self, _key: &LockKey, _owner: &OwnerToken) -> Result<bool, LockManagerError> {
        Ok(true)
    }
}
