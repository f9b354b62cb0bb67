//! Process-local idempotency tiers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{
    IdempotencyCache, IdempotencyCacheError, IdempotencyRepository, IdempotencyRepositoryError,
};
use crate::domain::{IdempotencyKey, IdempotencyRecord, Registration};

/// Expiring cache that can be switched off to simulate an outage.
pub struct InMemoryIdempotencyCache {
    entries: Mutex<HashMap<IdempotencyKey, (Registration, DateTime<Utc>)>>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            clock,
        }
    }

    /// Drop every entry, as after a cache restart.
    pub fn flush(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &IdempotencyKey) -> bool {
        let now = self.clock.utc();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now)
    }

    fn ensure_available(&self) -> Result<(), IdempotencyCacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IdempotencyCacheError::backend("cache unavailable"))
        }
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Registration>, IdempotencyCacheError> {
        self.ensure_available()?;
        let now = self.clock.utc();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(response, _)| response.clone()))
    }

    async fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        response: &Registration,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        self.ensure_available()?;
        let now = self.clock.utc();
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|error| IdempotencyCacheError::backend(format!("invalid ttl: {error}")))?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|(_, expires_at)| *expires_at > now) {
            return Ok(false);
        }
        entries.insert(key.clone(), (response.clone(), now + ttl));
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryIdempotencyRepository {
    records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyRepositoryError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<bool, IdempotencyRepositoryError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records
            .get(&record.key)
            .is_some_and(|existing| existing.is_live_at(record.created_at))
        {
            return Ok(false);
        }
        records.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, record| record.is_live_at(now));
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}
