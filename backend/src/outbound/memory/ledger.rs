//! Process-local competition ledger.
//!
//! One mutex guards all tables, so each seat claim observes and mutates a
//! consistent snapshot exactly like a serializable transaction.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ports::{CompetitionLedger, CompetitionLedgerError};
use crate::domain::{
    Competition, CompetitionId, IdempotencyKey, ParticipantContact, Registration,
    RegistrationDetails, RegistrationId, RegistrationStatus, SeatRequest, UserId,
};

#[derive(Default)]
struct LedgerTables {
    users: HashMap<UserId, ParticipantContact>,
    competitions: HashMap<CompetitionId, Competition>,
    /// Insertion order doubles as registration order.
    registrations: Vec<Registration>,
}

#[derive(Default)]
pub struct InMemoryCompetitionLedger {
    tables: Mutex<LedgerTables>,
}

impl InMemoryCompetitionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: UserId, contact: ParticipantContact) {
        self.lock().users.insert(id, contact);
    }

    pub fn add_competition(&self, competition: Competition) {
        self.lock().competitions.insert(competition.id(), competition);
    }

    pub fn competition(&self, id: CompetitionId) -> Option<Competition> {
        self.lock().competitions.get(&id).cloned()
    }

    /// Overwrite a registration's status, as an operator would.
    ///
    /// Returns `false` when no registration has `id`.
    pub fn set_status(&self, id: RegistrationId, status: RegistrationStatus) -> bool {
        let mut tables = self.lock();
        match tables.registrations.iter_mut().find(|r| r.id == id) {
            Some(registration) => {
                registration.status = status;
                true
            }
            None => false,
        }
    }

    /// Active registrations for `competition_id`.
    pub fn active_registrations(&self, competition_id: CompetitionId) -> usize {
        self.lock()
            .registrations
            .iter()
            .filter(|r| r.competition_id == competition_id && r.status.is_active())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn claim_seat(
    tables: &mut LedgerTables,
    request: &SeatRequest,
) -> Result<RegistrationDetails, CompetitionLedgerError> {
    let competition = tables
        .competitions
        .get(&request.competition_id)
        .cloned()
        .ok_or_else(|| CompetitionLedgerError::not_found(request.competition_id))?;

    if !competition.accepts_registrations_at(request.requested_at) {
        return Err(CompetitionLedgerError::deadline_passed(
            competition.reg_deadline(),
        ));
    }
    if tables.registrations.iter().any(|r| {
        r.belongs_to(request.user_id, request.competition_id) && r.status.is_active()
    }) {
        return Err(CompetitionLedgerError::already_registered(
            request.user_id,
            request.competition_id,
        ));
    }
    if competition.is_full() {
        return Err(CompetitionLedgerError::full());
    }
    let key_taken = request.idempotency_key.as_ref().is_some_and(|key| {
        tables
            .registrations
            .iter()
            .any(|r| r.idempotency_key.as_ref() == Some(key))
    });
    if key_taken {
        return Err(CompetitionLedgerError::duplicate_idempotency_key());
    }
    let participant = tables
        .users
        .get(&request.user_id)
        .cloned()
        .ok_or_else(|| CompetitionLedgerError::query(format!("unknown user {}", request.user_id)))?;

    let stored = tables
        .competitions
        .get_mut(&request.competition_id)
        .ok_or_else(|| CompetitionLedgerError::not_found(request.competition_id))?;
    if !stored.take_seat(competition.version()) {
        return Err(CompetitionLedgerError::conflict(
            "competition version changed during registration",
        ));
    }

    let registration = Registration::pending(request);
    tables.registrations.push(registration.clone());
    Ok(RegistrationDetails {
        registration,
        participant,
        competition: competition.summary(),
    })
}

#[async_trait]
impl CompetitionLedger for InMemoryCompetitionLedger {
    async fn register_seat(
        &self,
        request: &SeatRequest,
    ) -> Result<RegistrationDetails, CompetitionLedgerError> {
        claim_seat(&mut self.lock(), request)
    }

    async fn registration(
        &self,
        id: RegistrationId,
    ) -> Result<Option<Registration>, CompetitionLedgerError> {
        Ok(self.lock().registrations.iter().find(|r| r.id == id).cloned())
    }

    async fn registration_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Registration>, CompetitionLedgerError> {
        Ok(self
            .lock()
            .registrations
            .iter()
            .find(|r| r.idempotency_key.as_ref() == Some(key))
            .cloned())
    }

    async fn mark_confirmed(&self, id: RegistrationId) -> Result<bool, CompetitionLedgerError> {
        let mut tables = self.lock();
        let registration = tables
            .registrations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CompetitionLedgerError::query(format!("unknown registration {id}")))?;
        if registration.status != RegistrationStatus::Pending {
            return Ok(false);
        }
        registration.status = RegistrationStatus::Confirmed;
        Ok(true)
    }

    async fn registrations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Registration>, CompetitionLedgerError> {
        let mut found: Vec<_> = self
            .lock()
            .registrations
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        found.reverse();
        found.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(found)
    }

    async fn registrations_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Vec<Registration>, CompetitionLedgerError> {
        let mut found: Vec<_> = self
            .lock()
            .registrations
            .iter()
            .filter(|r| r.competition_id == competition_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.registered_at);
        Ok(found)
    }

    async fn confirmed_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RegistrationDetails>, CompetitionLedgerError> {
        let tables = self.lock();
        let details = tables
            .registrations
            .iter()
            .filter(|r| r.status == RegistrationStatus::Confirmed)
            .filter_map(|registration| {
                let competition = tables.competitions.get(&registration.competition_id)?;
                let start = competition.start_date()?;
                if start < from || start > to {
                    return None;
                }
                let participant = tables.users.get(&registration.user_id)?.clone();
                Some(RegistrationDetails {
                    registration: registration.clone(),
                    participant,
                    competition: competition.summary(),
                })
            })
            .collect();
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CompetitionDraft;
    use chrono::TimeDelta;
    use rstest::rstest;

    fn seeded(
        now: DateTime<Utc>,
        start_in: Option<TimeDelta>,
    ) -> (InMemoryCompetitionLedger, SeatRequest) {
        let ledger = InMemoryCompetitionLedger::new();
        let competition_id = CompetitionId::random();
        let competition = Competition::open(CompetitionDraft {
            id: competition_id,
            title: "Night Orienteering".to_owned(),
            description: String::new(),
            capacity: 2,
            reg_deadline: now + TimeDelta::days(1),
            start_date: start_in.map(|offset| now + offset),
        })
        .expect("valid competition");
        ledger.add_competition(competition);
        let user_id = UserId::random();
        ledger.add_user(
            user_id,
            ParticipantContact {
                name: "Ines".to_owned(),
                email: "ines@example.com".to_owned(),
            },
        );
        let request = SeatRequest {
            user_id,
            competition_id,
            idempotency_key: None,
            requested_at: now,
        };
        (ledger, request)
    }

    #[rstest]
    #[case(RegistrationStatus::Pending, true, RegistrationStatus::Confirmed)]
    #[case(RegistrationStatus::Confirmed, false, RegistrationStatus::Confirmed)]
    #[case(RegistrationStatus::Cancelled, false, RegistrationStatus::Cancelled)]
    #[case(RegistrationStatus::Failed, false, RegistrationStatus::Failed)]
    #[tokio::test]
    async fn only_pending_registrations_are_confirmed(
        #[case] from: RegistrationStatus,
        #[case] changed: bool,
        #[case] to: RegistrationStatus,
    ) {
        let (ledger, request) = seeded(Utc::now(), None);
        let details = ledger.register_seat(&request).await.expect("seat claimed");
        let id = details.registration.id;
        assert!(ledger.set_status(id, from));

        let confirmed = ledger.mark_confirmed(id).await.expect("known registration");

        assert_eq!(confirmed, changed);
        let stored = ledger.registration(id).await.expect("lookup").expect("stored");
        assert_eq!(stored.status, to);
    }

    #[rstest]
    #[case(TimeDelta::hours(24), 1)]
    #[case(TimeDelta::hours(24) + TimeDelta::seconds(1), 0)]
    #[case(TimeDelta::zero(), 1)]
    #[tokio::test]
    async fn reminder_window_includes_both_bounds(
        #[case] start_in: TimeDelta,
        #[case] expected: usize,
    ) {
        let now = Utc::now();
        let (ledger, request) = seeded(now, Some(start_in));
        let details = ledger.register_seat(&request).await.expect("seat claimed");
        assert!(ledger.mark_confirmed(details.registration.id).await.expect("confirm"));

        let upcoming = ledger
            .confirmed_starting_between(now, now + TimeDelta::hours(24))
            .await
            .expect("window query");

        assert_eq!(upcoming.len(), expected);
    }
}
