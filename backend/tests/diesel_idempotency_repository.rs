//! `DieselIdempotencyRepository` against embedded PostgreSQL.

use std::time::Duration;

use chrono::{DateTime, SubsecRound as _, TimeDelta, Utc};
use compete_backend::domain::ports::IdempotencyRepository;
use compete_backend::domain::{
    CompetitionId, IdempotencyKey, IdempotencyRecord, Registration, RegistrationId,
    RegistrationStatus, UserId,
};
use compete_backend::outbound::persistence::DieselIdempotencyRepository;
use futures::future::join_all;
use rstest::{fixture, rstest};

mod support;

use support::{TestDatabase, handle_cluster_setup_failure, provision_test_database};

const TTL: Duration = Duration::from_secs(24 * 3600);

#[fixture]
fn database() -> Option<TestDatabase> {
    match provision_test_database(6) {
        Ok(database) => Some(database),
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn key() -> IdempotencyKey {
    IdempotencyKey::new("checkout-7f3a-retry").expect("valid key")
}

fn record(at: DateTime<Utc>, ttl: Duration) -> IdempotencyRecord {
    let response = Registration {
        id: RegistrationId::random(),
        user_id: UserId::random(),
        competition_id: CompetitionId::random(),
        status: RegistrationStatus::Pending,
        idempotency_key: Some(key()),
        registered_at: at,
    };
    IdempotencyRecord::new(key(), response, at, ttl)
}

#[rstest]
fn live_record_is_never_overwritten(database: Option<TestDatabase>) {
    let Some(db) = database else { return };
    let now = now();
    let repository = DieselIdempotencyRepository::new(db.pool.clone());
    let first = record(now, TTL);
    let second = record(now + TimeDelta::minutes(5), TTL);

    let stored = db
        .runtime
        .block_on(repository.insert_if_absent(&first))
        .expect("insert");
    let replaced = db
        .runtime
        .block_on(repository.insert_if_absent(&second))
        .expect("insert");
    let found = db.runtime.block_on(repository.find(&key())).expect("find");

    assert!(stored);
    assert!(!replaced);
    assert_eq!(found, Some(first));
}

#[rstest]
fn racing_inserts_store_exactly_one_record(database: Option<TestDatabase>) {
    let Some(db) = database else { return };
    let now = now();
    let repository = DieselIdempotencyRepository::new(db.pool.clone());
    let candidates: Vec<IdempotencyRecord> = (0..5).map(|_| record(now, TTL)).collect();

    let outcomes = db.runtime.block_on(join_all(
        candidates
            .iter()
            .map(|candidate| repository.insert_if_absent(candidate)),
    ));
    let found = db
        .runtime
        .block_on(repository.find(&key()))
        .expect("find")
        .expect("one record stored");

    let winners: Vec<&IdempotencyRecord> = outcomes
        .iter()
        .zip(&candidates)
        .filter_map(|(outcome, candidate)| {
            outcome.as_ref().ok().filter(|stored| **stored).map(|_| candidate)
        })
        .collect();
    assert_eq!(winners, vec![&found]);
}

#[rstest]
fn expired_record_gives_way_to_a_new_one(database: Option<TestDatabase>) {
    let Some(db) = database else { return };
    let now = now();
    let repository = DieselIdempotencyRepository::new(db.pool.clone());
    let stale = record(now - TimeDelta::hours(2), Duration::from_secs(3600));
    let fresh = record(now, TTL);
    db.runtime
        .block_on(repository.insert_if_absent(&stale))
        .expect("insert");

    let replaced = db
        .runtime
        .block_on(repository.insert_if_absent(&fresh))
        .expect("insert");
    let found = db.runtime.block_on(repository.find(&key())).expect("find");

    assert!(replaced);
    assert_eq!(found, Some(fresh));
}

#[rstest]
fn sweep_removes_only_expired_records(database: Option<TestDatabase>) {
    let Some(db) = database else { return };
    let now = now();
    let repository = DieselIdempotencyRepository::new(db.pool.clone());
    db.runtime
        .block_on(repository.insert_if_absent(&record(now, Duration::from_secs(60))))
        .expect("insert");

    let early = db
        .runtime
        .block_on(repository.delete_expired(now + TimeDelta::seconds(59)))
        .expect("sweep");
    let due = db
        .runtime
        .block_on(repository.delete_expired(now + TimeDelta::seconds(60)))
        .expect("sweep");

    assert_eq!((early, due), (0, 1));
    let found = db.runtime.block_on(repository.find(&key())).expect("find");
    assert!(found.is_none());
}
