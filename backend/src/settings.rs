//! Engine configuration loaded via OrthoConfig.
//!
//! Every option can be set through a `COMPETE_*` environment variable or a
//! config file. The binary's own arguments are never parsed as settings.
//! Unset options fall back to the defaults below.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{
    BackoffPolicy, IdempotencyConfig, JobOptions, JobWorkerConfig, MaintenanceConfig,
    RegistrationCoordinatorConfig,
};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/compete";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_WORKER_CONCURRENCY: usize = 5;
const DEFAULT_JOB_LEASE_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_FAILED_JOB_RETENTION_DAYS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 6 * 3600;
const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 24 * 3600;

/// Settings for the registration engine and its worker.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "COMPETE")]
pub struct EngineSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Redis connection URL for locks and the idempotency cache.
    pub redis_url: Option<String>,
    /// Competition lock lifetime; must exceed the transaction timeout.
    #[ortho_config(default = 15_000)]
    pub lock_ttl_ms: u64,
    /// Ledger transaction timeout.
    #[ortho_config(default = 10_000)]
    pub transaction_timeout_ms: u64,
    /// Clamped to `1..=87600`.
    pub idempotency_ttl_hours: Option<u64>,
    pub worker_concurrency: Option<usize>,
    pub job_max_attempts: Option<u32>,
    /// Base delay of the exponential job backoff.
    pub job_backoff_ms: Option<u64>,
    pub job_lease_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub failed_job_retention_days: Option<u64>,
    /// Period of the idempotency and dead-letter sweep in `work` mode.
    pub sweep_interval_secs: Option<u64>,
    /// Period of the reminder scan in `work` mode.
    pub reminder_interval_secs: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            lock_ttl_ms: duration_ms(RegistrationCoordinatorConfig::DEFAULT_LOCK_TTL),
            transaction_timeout_ms: duration_ms(
                RegistrationCoordinatorConfig::DEFAULT_TRANSACTION_TIMEOUT,
            ),
            idempotency_ttl_hours: None,
            worker_concurrency: None,
            job_max_attempts: None,
            job_backoff_ms: None,
            job_lease_secs: None,
            poll_interval_ms: None,
            failed_job_retention_days: None,
            sweep_interval_secs: None,
            reminder_interval_secs: None,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl EngineSettings {
    pub fn database_url(&self) -> &str {
        self.database_url.as_deref().unwrap_or(DEFAULT_DATABASE_URL)
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or(DEFAULT_REDIS_URL)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// At least one worker slot.
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
            .unwrap_or(DEFAULT_WORKER_CONCURRENCY)
            .max(1)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_secs
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(
            self.reminder_interval_secs
                .unwrap_or(DEFAULT_REMINDER_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn idempotency_config(&self) -> IdempotencyConfig {
        IdempotencyConfig::from_hours(
            self.idempotency_ttl_hours
                .unwrap_or(IdempotencyConfig::DEFAULT_TTL_HOURS),
        )
    }

    /// Attempts and backoff shared by every job kind.
    pub fn job_options(&self) -> JobOptions {
        let defaults = JobOptions::default();
        JobOptions {
            max_attempts: self.job_max_attempts.unwrap_or(defaults.max_attempts).max(1),
            backoff: BackoffPolicy {
                base: self
                    .job_backoff_ms
                    .map_or(defaults.backoff.base, Duration::from_millis),
                max: defaults.backoff.max,
            },
        }
    }

    pub fn coordinator_config(&self) -> RegistrationCoordinatorConfig {
        RegistrationCoordinatorConfig {
            lock_ttl: self.lock_ttl(),
            transaction_timeout: self.transaction_timeout(),
            confirmation_job: self.job_options(),
        }
    }

    pub fn worker_config(&self) -> JobWorkerConfig {
        JobWorkerConfig {
            concurrency: self.worker_concurrency(),
            poll_interval: Duration::from_millis(
                self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            lease: Duration::from_secs(self.job_lease_secs.unwrap_or(DEFAULT_JOB_LEASE_SECS)),
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        let retention_days = self
            .failed_job_retention_days
            .unwrap_or(DEFAULT_FAILED_JOB_RETENTION_DAYS);
        MaintenanceConfig {
            failed_job_retention: Duration::from_secs(retention_days.saturating_mul(24 * 3600)),
            reminder_job: self.job_options(),
            ..MaintenanceConfig::default()
        }
    }
}
