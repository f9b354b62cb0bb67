//! Competition aggregate as seen by the registration engine.
//!
//! A competition owns a fixed `capacity` and a `seats_left` counter that only
//! the ledger mutates. The `version` counter increments on every seat change
//! and backs the optimistic guard on the decrement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CompetitionId;

/// Validation errors raised when constructing a [`Competition`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompetitionValidationError {
    #[error("competition title must not be empty")]
    EmptyTitle,
    #[error("competition capacity must be greater than zero")]
    ZeroCapacity,
    #[error("seats left ({seats_left}) must not exceed capacity ({capacity})")]
    SeatsExceedCapacity { seats_left: u32, capacity: u32 },
}

/// Competition with seat accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competition {
    id: CompetitionId,
    title: String,
    description: String,
    capacity: u32,
    seats_left: u32,
    reg_deadline: DateTime<Utc>,
    start_date: Option<DateTime<Utc>>,
    version: i64,
}

/// Inputs required to open a new competition.
#[derive(Debug, Clone)]
pub struct CompetitionDraft {
    pub id: CompetitionId,
    pub title: String,
    pub description: String,
    pub capacity: u32,
    pub reg_deadline: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
}

impl Competition {
    /// Open a competition with every seat available.
    ///
    /// New competitions need a non-blank title.
    pub fn open(draft: CompetitionDraft) -> Result<Self, CompetitionValidationError> {
        if draft.title.trim().is_empty() {
            return Err(CompetitionValidationError::EmptyTitle);
        }
        let capacity = draft.capacity;
        Self::restore(draft, capacity, 0)
    }

    /// Rebuild a competition from persisted state.
    ///
    /// Stored titles are taken as-is; only seat accounting is checked.
    pub fn restore(
        draft: CompetitionDraft,
        seats_left: u32,
        version: i64,
    ) -> Result<Self, CompetitionValidationError> {
        if draft.capacity == 0 {
            return Err(CompetitionValidationError::ZeroCapacity);
        }
        if seats_left > draft.capacity {
            return Err(CompetitionValidationError::SeatsExceedCapacity {
                seats_left,
                capacity: draft.capacity,
            });
        }
        Ok(Self {
            id: draft.id,
            title: draft.title,
            description: draft.description,
            capacity: draft.capacity,
            seats_left,
            reg_deadline: draft.reg_deadline,
            start_date: draft.start_date,
            version,
        })
    }

    pub fn id(&self) -> CompetitionId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn seats_left(&self) -> u32 {
        self.seats_left
    }

    pub fn reg_deadline(&self) -> DateTime<Utc> {
        self.reg_deadline
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Registration stays open up to and including the deadline instant.
    pub fn accepts_registrations_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.reg_deadline
    }

    pub fn is_full(&self) -> bool {
        self.seats_left == 0
    }

    /// Take one seat if `expected_version` still matches.
    ///
    /// Returns `false` without mutating when the version moved or no seat is
    /// left.
    pub fn take_seat(&mut self, expected_version: i64) -> bool {
        if self.version != expected_version || self.seats_left == 0 {
            return false;
        }
        self.seats_left -= 1;
        self.version += 1;
        true
    }

    /// Lightweight projection carried on jobs and mail.
    pub fn summary(&self) -> CompetitionSummary {
        CompetitionSummary {
            id: self.id,
            title: self.title.clone(),
            start_date: self.start_date,
        }
    }
}

/// Identity, title and start of a competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionSummary {
    pub id: CompetitionId,
    pub title: String,
    pub start_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    #[fixture]
    fn draft() -> CompetitionDraft {
        CompetitionDraft {
            id: CompetitionId::random(),
            title: "Spring Hackathon".to_owned(),
            description: String::new(),
            capacity: 2,
            reg_deadline: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("ts"),
            start_date: None,
        }
    }

    #[rstest]
    fn open_starts_with_all_seats(draft: CompetitionDraft) {
        let competition = Competition::open(draft).expect("valid draft");
        assert_eq!(competition.seats_left(), 2);
        assert_eq!(competition.version(), 0);
    }

    #[rstest]
    fn zero_capacity_is_rejected(mut draft: CompetitionDraft) {
        draft.capacity = 0;
        assert_eq!(
            Competition::open(draft),
            Err(CompetitionValidationError::ZeroCapacity)
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_title_is_rejected_when_opening(mut draft: CompetitionDraft, #[case] title: &str) {
        draft.title = title.to_owned();
        assert_eq!(
            Competition::open(draft),
            Err(CompetitionValidationError::EmptyTitle)
        );
    }

    #[rstest]
    fn restore_keeps_a_stored_blank_title(mut draft: CompetitionDraft) {
        draft.title = String::new();
        let competition = Competition::restore(draft, 1, 4).expect("stored row");
        assert_eq!(competition.title(), "");
        assert_eq!(competition.seats_left(), 1);
    }

    #[rstest]
    fn restore_rejects_more_seats_than_capacity(draft: CompetitionDraft) {
        let err = Competition::restore(draft, 3, 0).expect_err("invalid seats");
        assert!(matches!(
            err,
            CompetitionValidationError::SeatsExceedCapacity { seats_left: 3, capacity: 2 }
        ));
    }

    #[rstest]
    fn deadline_instant_is_still_open(draft: CompetitionDraft) {
        let deadline = draft.reg_deadline;
        let competition = Competition::open(draft).expect("valid draft");
        assert!(competition.accepts_registrations_at(deadline));
        assert!(!competition.accepts_registrations_at(deadline + chrono::TimeDelta::milliseconds(1)));
    }

    #[rstest]
    fn take_seat_requires_matching_version(draft: CompetitionDraft) {
        let mut competition = Competition::open(draft).expect("valid draft");
        assert!(!competition.take_seat(7));
        assert!(competition.take_seat(0));
        assert!(competition.take_seat(1));
        assert!(competition.is_full());
        assert!(!competition.take_seat(2));
        assert_eq!(competition.version(), 2);
    }
}
