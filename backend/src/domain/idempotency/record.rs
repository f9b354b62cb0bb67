//! Durable idempotency records.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::IdempotencyKey;
use crate::domain::Registration;

/// Registration result stored under an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub response: Registration,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Record a result that stays replayable for `ttl` from `now`.
    pub fn new(
        key: IdempotencyKey,
        response: Registration,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::TimeDelta::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX);
        Self {
            key,
            response,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Expired records are treated as absent.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Time left before expiry, or `None` once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_live_at(now) {
            return None;
        }
        (self.expires_at - now).to_std().ok()
    }
}
