//! Registration orchestration.
//!
//! A registration moves through a fixed sequence of stages:
//!
//! 1. `Start`: replay a stored result when the idempotency key is known.
//! 2. `Locked`: hold the competition lock (try once, never wait).
//! 3. `Committed`: claim the seat in one ledger transaction.
//! 4. `JobEnqueued`: schedule the confirmation job (best effort).
//! 5. `IdempotencyStored`: store the result under the key (best effort).
//!
//! The lock is released on every path after the ledger step. The lock only
//! reduces contention; the ledger transaction alone keeps seats from being
//! oversold.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::domain::ports::{CompetitionLedger, CompetitionLedgerError, JobQueue, LockManager};
use crate::domain::{
    CompetitionId, ConfirmationJob, IdempotencyKey, IdempotencyService, JobOptions, JobPayload,
    LockGuard, LockKey, NewJob, Registration, RegistrationDetails, RegistrationError, SeatRequest,
    UserId,
};

/// Timing and delivery settings for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationCoordinatorConfig {
    /// Must exceed `transaction_timeout` so the lock outlives the ledger step.
    pub lock_ttl: Duration,
    /// Upper bound on the ledger transaction; expiry surfaces as `Busy`.
    pub transaction_timeout: Duration,
    /// Options for the confirmation job.
    pub confirmation_job: JobOptions,
}

impl RegistrationCoordinatorConfig {
    pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);
    pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for RegistrationCoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Self::DEFAULT_LOCK_TTL,
            transaction_timeout: Self::DEFAULT_TRANSACTION_TIMEOUT,
            confirmation_job: JobOptions::default(),
        }
    }
}

/// Port bundle required by the coordinator.
pub struct RegistrationCoordinatorPorts {
    pub idempotency: IdempotencyService,
    pub locks: Arc<dyn LockManager>,
    pub ledger: Arc<dyn CompetitionLedger>,
    pub queue: Arc<dyn JobQueue>,
}

/// Inputs for one registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub user_id: UserId,
    pub competition_id: CompetitionId,
    pub idempotency_key: Option<IdempotencyKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistrationStage {
    Start,
    Locked,
    Committed,
    JobEnqueued,
    IdempotencyStored,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Locked => "locked",
            Self::Committed => "committed",
            Self::JobEnqueued => "job_enqueued",
            Self::IdempotencyStored => "idempotency_stored",
        };
        f.write_str(name)
    }
}

/// Accepts registration requests and drives each one through the lock, the
/// ledger transaction and the follow-up bookkeeping.
///
/// Safe to share across tasks behind an `Arc`; all state lives in the ports.
pub struct RegistrationCoordinator {
    ports: RegistrationCoordinatorPorts,
    clock: Arc<dyn Clock>,
    config: RegistrationCoordinatorConfig,
}

impl RegistrationCoordinator {
    /// Build a coordinator over `ports`.
    ///
    /// Logs a warning when `config.lock_ttl` does not exceed
    /// `config.transaction_timeout`.
    pub fn new(
        ports: RegistrationCoordinatorPorts,
        clock: Arc<dyn Clock>,
        config: RegistrationCoordinatorConfig,
    ) -> Self {
        if config.lock_ttl <= config.transaction_timeout {
            warn!(
                lock_ttl_ms = duration_ms(config.lock_ttl),
                transaction_timeout_ms = duration_ms(config.transaction_timeout),
                "lock TTL does not exceed transaction timeout; the lock may expire mid-transaction"
            );
        }
        Self {
            ports,
            clock,
            config,
        }
    }

    /// Register `request.user_id` for `request.competition_id`.
    ///
    /// Repeating a request with the same idempotency key returns the original
    /// registration without side effects. Only [`RegistrationError::Busy`] is
    /// worth retrying.
    pub async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<Registration, RegistrationError> {
        let key = request
            .idempotency_key
            .as_ref()
            .map_or_else(|| "none".to_owned(), IdempotencyKey::fingerprint);
        let span = info_span!(
            "register",
            user_id = %request.user_id,
            competition_id = %request.competition_id,
            key = %key,
        );
        self.register_inner(request).instrument(span).await
    }

    async fn register_inner(
        &self,
        request: RegistrationRequest,
    ) -> Result<Registration, RegistrationError> {
        trace_stage(RegistrationStage::Start);
        if let Some(key) = &request.idempotency_key {
            if let Some(stored) = self.replay(key, &request).await? {
                info!("replayed stored registration");
                return Ok(stored);
            }
        }

        let guard = self.acquire_lock(request.competition_id).await?;
        trace_stage(RegistrationStage::Locked);

        let seat = SeatRequest {
            user_id: request.user_id,
            competition_id: request.competition_id,
            idempotency_key: request.idempotency_key.clone(),
            requested_at: self.clock.utc(),
        };
        let outcome = tokio::time::timeout(
            self.config.transaction_timeout,
            self.ports.ledger.register_seat(&seat),
        )
        .await;
        guard.release().await;

        let details = match outcome {
            Err(_elapsed) => {
                return Err(RegistrationError::busy("registration transaction timed out"));
            }
            Ok(Ok(details)) => details,
            Ok(Err(error)) => return self.resolve_rejection(error, &request).await,
        };
        trace_stage(RegistrationStage::Committed);

        self.enqueue_confirmation(&details).await;
        trace_stage(RegistrationStage::JobEnqueued);

        if let Some(key) = &request.idempotency_key {
            if let Err(error) = self
                .ports
                .idempotency
                .store(key, &details.registration)
                .await
            {
                warn!(error = %error, "idempotency store failed; retries fall back to the ledger");
            }
        }
        trace_stage(RegistrationStage::IdempotencyStored);

        info!(registration_id = %details.registration.id, "registration created");
        Ok(details.registration)
    }

    async fn replay(
        &self,
        key: &IdempotencyKey,
        request: &RegistrationRequest,
    ) -> Result<Option<Registration>, RegistrationError> {
        let stored = match self.ports.idempotency.check(key).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(error = %error, "idempotency lookup failed; relying on ledger uniqueness");
                None
            }
        };
        match stored {
            Some(registration) if registration.belongs_to(request.user_id, request.competition_id) => {
                Ok(Some(registration))
            }
            Some(_) => Err(RegistrationError::IdempotencyConflict),
            None => Ok(None),
        }
    }

    async fn acquire_lock(&self, competition_id: CompetitionId) -> Result<LockGuard, RegistrationError> {
        let key = LockKey::competition(competition_id);
        match LockGuard::try_acquire(Arc::clone(&self.ports.locks), key, self.config.lock_ttl).await {
            Ok(Some(guard)) => Ok(guard),
            Ok(None) => {
                debug!("competition lock contended");
                Err(RegistrationError::busy("competition is locked by another registration"))
            }
            Err(error) => {
                warn!(error = %error, "lock backend unavailable");
                Err(RegistrationError::busy("lock backend unavailable"))
            }
        }
    }

    /// A ledger rejection caused by our own earlier commit is a replay, not
    /// an error: the first attempt may have committed before its response or
    /// idempotency record was lost.
    async fn resolve_rejection(
        &self,
        error: CompetitionLedgerError,
        request: &RegistrationRequest,
    ) -> Result<Registration, RegistrationError> {
        let replayable = matches!(
            error,
            CompetitionLedgerError::AlreadyRegistered { .. }
                | CompetitionLedgerError::DuplicateIdempotencyKey
        );
        let Some(key) = request.idempotency_key.as_ref().filter(|_| replayable) else {
            return Err(log_rejection(error.into()));
        };

        let committed = match self.ports.ledger.registration_by_idempotency_key(key).await {
            Ok(committed) => committed,
            Err(lookup_error) => {
                warn!(error = %lookup_error, "registration lookup by key failed");
                return Err(log_rejection(error.into()));
            }
        };
        match committed {
            Some(registration) if registration.belongs_to(request.user_id, request.competition_id) => {
                info!(registration_id = %registration.id, "replayed committed registration");
                if let Err(store_error) = self.ports.idempotency.store(key, &registration).await {
                    warn!(error = %store_error, "idempotency store failed during replay");
                }
                Ok(registration)
            }
            Some(_) => Err(log_rejection(RegistrationError::IdempotencyConflict)),
            None => Err(log_rejection(error.into())),
        }
    }

    async fn enqueue_confirmation(&self, details: &RegistrationDetails) {
        let job = NewJob::immediate(
            JobPayload::Confirmation(ConfirmationJob::from(details)),
            self.config.confirmation_job,
            self.clock.utc(),
        );
        match self.ports.queue.enqueue(&job).await {
            Ok(job_id) => debug!(job_id = %job_id, "confirmation job enqueued"),
            Err(error) => warn!(
                registration_id = %details.registration.id,
                error = %error,
                "confirmation job enqueue failed; registration stays pending"
            ),
        }
    }

    /// Registrations held by `user_id`, newest first.
    pub async fn registrations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Registration>, RegistrationError> {
        Ok(self.ports.ledger.registrations_for_user(user_id).await?)
    }

    /// Registrations for `competition_id`, oldest first.
    pub async fn registrations_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Vec<Registration>, RegistrationError> {
        Ok(self
            .ports
            .ledger
            .registrations_for_competition(competition_id)
            .await?)
    }
}

fn trace_stage(stage: RegistrationStage) {
    debug!(stage = %stage, "registration stage reached");
}

fn log_rejection(error: RegistrationError) -> RegistrationError {
    match &error {
        RegistrationError::Internal { .. } => warn!(error = %error, "registration failed"),
        _ => info!(code = ?error.code(), "registration rejected"),
    }
    error
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
