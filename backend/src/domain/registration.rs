//! Registration records and their lifecycle status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CompetitionId, CompetitionSummary, IdempotencyKey, RegistrationId, UserId};

/// Lifecycle of a registration.
///
/// New rows start as [`RegistrationStatus::Pending`]; the confirmation job
/// moves them to [`RegistrationStatus::Confirmed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl RegistrationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    /// Cancelled rows release the user/competition pair.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown registration status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown registration status: {0}")]
pub struct ParseRegistrationStatusError(pub String);

impl FromStr for RegistrationStatus {
    type Err = ParseRegistrationStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            other => Err(ParseRegistrationStatusError(other.to_owned())),
        }
    }
}

/// A user's claim on one seat of a competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: RegistrationId,
    pub user_id: UserId,
    pub competition_id: CompetitionId,
    pub status: RegistrationStatus,
    pub idempotency_key: Option<IdempotencyKey>,
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    /// Fresh pending registration.
    pub fn pending(request: &SeatRequest) -> Self {
        Self {
            id: RegistrationId::random(),
            user_id: request.user_id,
            competition_id: request.competition_id,
            status: RegistrationStatus::Pending,
            idempotency_key: request.idempotency_key.clone(),
            registered_at: request.requested_at,
        }
    }

    /// Whether this registration answers a request for the same pair.
    pub fn belongs_to(&self, user_id: UserId, competition_id: CompetitionId) -> bool {
        self.user_id == user_id && self.competition_id == competition_id
    }
}

/// Inputs for one seat claim against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatRequest {
    pub user_id: UserId,
    pub competition_id: CompetitionId,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Instant compared against the registration deadline.
    pub requested_at: DateTime<Utc>,
}

/// Name and address used for participant mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantContact {
    pub name: String,
    pub email: String,
}

/// Registration joined with the participant and competition it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationDetails {
    pub registration: Registration,
    pub participant: ParticipantContact,
    pub competition: CompetitionSummary,
}
