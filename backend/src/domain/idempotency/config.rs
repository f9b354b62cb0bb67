//! Retention window for stored idempotency results.

use std::time::Duration;

/// Controls how long a registration result stays replayable.
///
/// # Example
///
/// ```
/// # use compete_backend::domain::IdempotencyConfig;
/// # use std::time::Duration;
/// let config = IdempotencyConfig::default();
/// assert_eq!(config.ttl(), Duration::from_secs(24 * 3600));
///
/// let clamped = IdempotencyConfig::from_hours(0);
/// assert_eq!(clamped.ttl(), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    ttl: Duration,
}

impl IdempotencyConfig {
    pub const DEFAULT_TTL_HOURS: u64 = 24;

    /// Shorter windows would expire before a client retry cycle finishes.
    const MIN_TTL_HOURS: u64 = 1;

    /// Ten years.
    const MAX_TTL_HOURS: u64 = 24 * 365 * 10;

    /// Build from an hour count, clamped to `[1, 87600]`.
    pub fn from_hours(hours: u64) -> Self {
        let hours = hours.clamp(Self::MIN_TTL_HOURS, Self::MAX_TTL_HOURS);
        Self {
            ttl: Duration::from_secs(hours.saturating_mul(3600)),
        }
    }

    /// Explicit TTL without clamping, for tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self::from_hours(Self::DEFAULT_TTL_HOURS)
    }
}
