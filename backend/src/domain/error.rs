//! Registration error taxonomy.
//!
//! These errors are transport agnostic. Inbound adapters map [`ErrorCode`] to
//! their own status codes; [`RegistrationError::is_retryable`] tells clients
//! whether repeating the same request can succeed.

use serde::{Deserialize, Serialize};

use super::CompetitionId;
use super::ports::CompetitionLedgerError;

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The competition does not exist.
    NotFound,
    /// The registration deadline has passed.
    DeadlinePassed,
    /// The user already holds a registration for the competition.
    AlreadyRegistered,
    /// No seats remain.
    Full,
    /// Another request holds the competition; retry shortly.
    Busy,
    /// The idempotency key was used for a different registration.
    IdempotencyConflict,
    /// An unexpected storage or infrastructure failure.
    InternalError,
}

/// Terminal outcome of a failed registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("competition {competition_id} not found")]
    NotFound { competition_id: CompetitionId },
    #[error("registration deadline has passed")]
    DeadlinePassed,
    #[error("already registered for this competition")]
    AlreadyRegistered,
    #[error("competition is full")]
    Full,
    #[error("competition is busy, please retry: {reason}")]
    Busy { reason: String },
    #[error("idempotency key was already used for a different registration")]
    IdempotencyConflict,
    #[error("registration failed: {message}")]
    Internal { message: String },
}

impl RegistrationError {
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::DeadlinePassed => ErrorCode::DeadlinePassed,
            Self::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            Self::Full => ErrorCode::Full,
            Self::Busy { .. } => ErrorCode::Busy,
            Self::IdempotencyConflict => ErrorCode::IdempotencyConflict,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Only `Busy` may succeed on an identical retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

impl From<CompetitionLedgerError> for RegistrationError {
    fn from(error: CompetitionLedgerError) -> Self {
        match error {
            CompetitionLedgerError::NotFound { competition_id } => {
                Self::NotFound { competition_id }
            }
            CompetitionLedgerError::DeadlinePassed { .. } => Self::DeadlinePassed,
            CompetitionLedgerError::AlreadyRegistered { .. } => Self::AlreadyRegistered,
            CompetitionLedgerError::DuplicateIdempotencyKey => Self::IdempotencyConflict,
            CompetitionLedgerError::Full => Self::Full,
            CompetitionLedgerError::Conflict { message } => Self::busy(message),
            CompetitionLedgerError::Connection { message }
            | CompetitionLedgerError::Query { message } => Self::internal(message),
        }
    }
}
