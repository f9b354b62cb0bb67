//! Process-local dead-letter store.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::FailedJob;
use crate::domain::ports::{FailedJobRepository, FailedJobRepositoryError};

#[derive(Default)]
pub struct InMemoryFailedJobRepository {
    records: Mutex<Vec<FailedJob>>,
}

impl InMemoryFailedJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<FailedJob> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl FailedJobRepository for InMemoryFailedJobRepository {
    async fn record(&self, job: &FailedJob) -> Result<bool, FailedJobRepositoryError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.iter().any(|existing| existing.job_id == job.job_id) {
            return Ok(false);
        }
        records.push(job.clone());
        Ok(true)
    }

    async fn list(&self, limit: u32) -> Result<Vec<FailedJob>, FailedJobRepositoryError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut newest_first: Vec<_> = records.iter().rev().cloned().collect();
        newest_first.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        newest_first.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(newest_first)
    }

    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, FailedJobRepositoryError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|record| record.failed_at >= cutoff);
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}
