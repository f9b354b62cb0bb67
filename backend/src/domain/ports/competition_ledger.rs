//! Port for the transactional seat ledger.
//!
//! The ledger is the source of truth for seat counts and registrations. Every
//! call to [`CompetitionLedger::register_seat`] runs as one serializable
//! transaction: either the registration row and the seat decrement both
//! commit, or neither does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CompetitionId, IdempotencyKey, Registration, RegistrationDetails, RegistrationId, SeatRequest,
    UserId,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by competition ledger adapters.
    pub enum CompetitionLedgerError {
        /// No competition exists with the requested id.
        NotFound { competition_id: CompetitionId } => "competition {competition_id} not found",
        /// The request arrived after the registration deadline.
        DeadlinePassed { deadline: DateTime<Utc> } => "registration closed at {deadline}",
        /// The user already holds a non-cancelled registration.
        AlreadyRegistered { user_id: UserId, competition_id: CompetitionId } =>
            "user {user_id} is already registered for competition {competition_id}",
        /// Another registration already carries the idempotency key.
        DuplicateIdempotencyKey => "idempotency key is already bound to a registration",
        /// No seats remain.
        Full => "competition has no seats left",
        /// A concurrent writer invalidated this transaction.
        Conflict { message: String } => "ledger transaction conflicted: {message}",
        /// Ledger connection could not be established.
        Connection { message: String } => "ledger connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "ledger query failed: {message}",
    }
}

/// Seat accounting and registration storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompetitionLedger: Send + Sync {
    /// Claim one seat for `request.user_id`.
    ///
    /// Checks run in order: competition exists, deadline not passed, no
    /// active registration for the pair, seats remain. The new registration is
    /// stored as `PENDING` and the seat counter is decremented under a
    /// version guard.
    async fn register_seat(
        &self,
        request: &SeatRequest,
    ) -> Result<RegistrationDetails, CompetitionLedgerError>;

    /// Look up a registration by id.
    async fn registration(
        &self,
        id: RegistrationId,
    ) -> Result<Option<Registration>, CompetitionLedgerError>;

    /// Look up the registration that was created with `key`.
    async fn registration_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Registration>, CompetitionLedgerError>;

    /// Move a `PENDING` registration to `CONFIRMED`.
    ///
    /// Returns `false`, changing nothing, when the registration is no longer
    /// pending. Cancelled and failed registrations are never revived.
    async fn mark_confirmed(&self, id: RegistrationId) -> Result<bool, CompetitionLedgerError>;

    /// Registrations held by `user_id`, newest first.
    async fn registrations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Registration>, CompetitionLedgerError>;

    /// Registrations for `competition_id`, oldest first.
    async fn registrations_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Vec<Registration>, CompetitionLedgerError>;

    /// Confirmed registrations whose competition starts in `[from, to]`.
    ///
    /// Both bounds are inclusive.
    async fn confirmed_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RegistrationDetails>, CompetitionLedgerError>;
}
