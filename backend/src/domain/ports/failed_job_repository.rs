//! Port for the dead-letter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::FailedJob;

use super::define_port_error;

define_port_error! {
    /// Errors raised by dead-letter adapters.
    pub enum FailedJobRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "failed job repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "failed job repository query failed: {message}",
        /// Stored payload could not be encoded or decoded.
        Serialization { message: String } => "failed job repository serialization failed: {message}",
    }
}

/// Durable record of jobs that exhausted their retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailedJobRepository: Send + Sync {
    /// Store `job` unless a record for the same job id exists.
    ///
    /// Returns `true` when this call stored the record.
    async fn record(&self, job: &FailedJob) -> Result<bool, FailedJobRepositoryError>;

    /// Most recent failures first.
    async fn list(&self, limit: u32) -> Result<Vec<FailedJob>, FailedJobRepositoryError>;

    /// Delete records that failed before `cutoff`.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>)
    -> Result<u64, FailedJobRepositoryError>;
}
