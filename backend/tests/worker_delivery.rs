//! End-to-end delivery of confirmation and reminder jobs through the worker,
//! driven through the in-memory engine.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use compete_backend::domain::ports::{JobQueue as _, JobQueueError};
use compete_backend::domain::{
    CompetitionId, HandledJob, IdempotencyKey, JobOutcome, JobState, LockKey, NewJob, QueueName,
    Registration, RegistrationRequest, RegistrationStatus, UserId,
};
use compete_backend::test_support::InMemoryEngine;
use mockable::Clock as _;
use rstest::{fixture, rstest};
use tokio::sync::watch;

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

struct Seeded {
    engine: InMemoryEngine,
    user_id: UserId,
    competition_id: CompetitionId,
    registration: Registration,
}

async fn registered(now: DateTime<Utc>, start_in: chrono::Duration) -> Seeded {
    let engine = InMemoryEngine::new(now);
    let competition_id = engine.add_competition(
        "Spring Hackathon",
        10,
        now + chrono::Duration::days(1),
        Some(now + start_in),
    );
    let user_id = engine.add_user("Ada");
    let registration = engine
        .coordinator
        .register(RegistrationRequest {
            user_id,
            competition_id,
            idempotency_key: Some(IdempotencyKey::new("spring-hack-ada-1").expect("valid key")),
        })
        .await
        .expect("registered");
    Seeded {
        engine,
        user_id,
        competition_id,
        registration,
    }
}

async fn status_of(seeded: &Seeded) -> RegistrationStatus {
    seeded
        .engine
        .coordinator
        .registrations_for_user(seeded.user_id)
        .await
        .expect("projection")
        .into_iter()
        .find(|registration| registration.id == seeded.registration.id)
        .expect("registration listed")
        .status
}

#[rstest]
#[tokio::test]
async fn confirmation_mail_is_sent_and_registration_confirmed(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    assert_eq!(seeded.registration.status, RegistrationStatus::Pending);

    let outcome = seeded
        .engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");

    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed {
            handled: HandledJob::Confirmed,
            ..
        })
    ));
    let mail = seeded.engine.mailbox.delivered();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].to, "ada@example.com");
    assert_eq!(mail[0].subject, "Registration Confirmed: Spring Hackathon");
    assert!(mail[0].body.contains(&seeded.registration.id.to_string()));
    assert_eq!(status_of(&seeded).await, RegistrationStatus::Confirmed);
    assert_eq!(
        seeded.engine.queue.jobs(QueueName::Registration)[0].state,
        JobState::Completed
    );
}

#[rstest]
#[tokio::test]
async fn redelivered_confirmation_sends_nothing_new(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("first delivery");

    let original = engine.queue.jobs(QueueName::Registration)[0].payload.clone();
    engine
        .queue
        .enqueue(&NewJob::immediate(original, Default::default(), engine.clock.utc()))
        .await
        .expect("re-enqueue");
    let outcome = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("second delivery");

    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed {
            handled: HandledJob::AlreadyConfirmed,
            ..
        })
    ));
    assert_eq!(engine.mailbox.delivered().len(), 1);
}

#[rstest]
#[tokio::test]
async fn cancelled_registration_is_never_confirmed(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    assert!(seeded
        .engine
        .ledger
        .set_status(seeded.registration.id, RegistrationStatus::Cancelled));

    let outcome = seeded
        .engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("delivery");

    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed {
            handled: HandledJob::ConfirmationSkipped,
            ..
        })
    ));
    assert!(seeded.engine.mailbox.delivered().is_empty());
    assert_eq!(status_of(&seeded).await, RegistrationStatus::Cancelled);
}

#[rstest]
#[tokio::test]
async fn job_from_a_crashed_worker_is_redelivered_after_its_lease(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    let lease_until = now + chrono::Duration::seconds(30);
    let abandoned = engine
        .queue
        .reserve(QueueName::Registration, now, lease_until)
        .await
        .expect("reserve")
        .expect("job available");

    let while_leased = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert_eq!(while_leased, None);

    engine.clock.advance(Duration::from_secs(31));
    let outcome = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");

    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed { job_id, handled: HandledJob::Confirmed }) if job_id == abandoned.id
    ));
    assert_eq!(engine.queue.jobs(QueueName::Registration)[0].attempts, 2);
    assert_eq!(engine.mailbox.delivered().len(), 1);
}

#[rstest]
#[tokio::test]
async fn job_outliving_every_lease_is_dead_lettered(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    for _ in 0..3 {
        let at = engine.clock.utc();
        engine
            .queue
            .reserve(QueueName::Registration, at, at + chrono::Duration::seconds(30))
            .await
            .expect("reserve")
            .expect("job available");
        engine.clock.advance(Duration::from_secs(31));
    }

    let outcome = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");

    assert!(matches!(
        outcome,
        Some(JobOutcome::DeadLettered { attempts: 3, .. })
    ));
    assert!(engine.mailbox.delivered().is_empty());
    let dead = engine.failed_jobs.all();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].error.contains("lease expired"));
    assert_eq!(
        engine.queue.jobs(QueueName::Registration)[0].state,
        JobState::Failed
    );
    engine.clock.advance(Duration::from_secs(31));
    let again = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert_eq!(again, None);
}

#[rstest]
#[tokio::test]
async fn worker_that_lost_its_lease_cannot_reopen_the_job(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    let slow = engine
        .queue
        .reserve(QueueName::Registration, now, now + chrono::Duration::seconds(30))
        .await
        .expect("reserve")
        .expect("job available");
    engine.clock.advance(Duration::from_secs(31));
    engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");

    let late = engine
        .queue
        .retry_later(slow.lease(), engine.clock.utc(), "smtp timeout")
        .await;

    assert!(matches!(late, Err(JobQueueError::StaleLease { attempt: 1, .. })));
    let jobs = engine.queue.jobs(QueueName::Registration);
    assert_eq!(jobs[0].state, JobState::Completed);
    assert_eq!(engine.mailbox.delivered().len(), 1);
}

#[rstest]
#[tokio::test]
async fn failing_delivery_backs_off_then_dead_letters(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    engine.mailbox.set_available(false);

    let first = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert!(matches!(
        first,
        Some(JobOutcome::Retrying { attempt: 1, run_at, .. }) if run_at == now + chrono::Duration::seconds(2)
    ));
    let too_early = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert_eq!(too_early, None);

    let stats = engine
        .queue
        .stats(QueueName::Registration, engine.clock.utc())
        .await
        .expect("stats");
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.total(), 1);

    engine.clock.advance(Duration::from_secs(2));
    let second = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert!(matches!(
        second,
        Some(JobOutcome::Retrying { attempt: 2, run_at, .. })
            if run_at == now + chrono::Duration::seconds(6)
    ));

    engine.clock.advance(Duration::from_secs(4));
    let third = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert!(matches!(
        third,
        Some(JobOutcome::DeadLettered { attempts: 3, .. })
    ));

    let dead = engine.failed_jobs.all();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].queue, QueueName::Registration);
    assert!(dead[0].error.contains("mail relay unavailable"));
    assert_eq!(
        engine.queue.jobs(QueueName::Registration)[0].state,
        JobState::Failed
    );
    assert_eq!(status_of(&seeded).await, RegistrationStatus::Pending);
}

#[rstest]
#[tokio::test]
async fn paused_queue_holds_jobs_until_resumed(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    engine.queue.pause(QueueName::Registration).await.expect("pause");

    let held = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert_eq!(held, None);
    assert!(engine.mailbox.delivered().is_empty());

    engine.queue.resume(QueueName::Registration).await.expect("resume");
    let released = engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable");
    assert!(released.is_some());
}

#[rstest]
#[tokio::test]
async fn reminders_go_to_confirmed_participants_starting_soon(now: DateTime<Utc>) {
    let soon = registered(now, chrono::Duration::hours(12)).await;
    let engine = &soon.engine;
    let later = engine.add_competition(
        "Winter Games",
        10,
        now + chrono::Duration::days(1),
        Some(now + chrono::Duration::days(5)),
    );
    engine
        .coordinator
        .register(RegistrationRequest {
            user_id: soon.user_id,
            competition_id: later,
            idempotency_key: None,
        })
        .await
        .expect("second registration");
    while engine
        .worker
        .process_next(QueueName::Registration)
        .await
        .expect("queue reachable")
        .is_some()
    {}

    let enqueued = engine
        .maintenance
        .enqueue_upcoming_reminders()
        .await
        .expect("reminder scan");
    assert_eq!(enqueued, 1);

    let outcome = engine
        .worker
        .process_next(QueueName::Reminder)
        .await
        .expect("queue reachable");
    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed {
            handled: HandledJob::ReminderSent,
            ..
        })
    ));
    let reminders: Vec<_> = engine
        .mailbox
        .delivered()
        .into_iter()
        .filter(|mail| mail.subject.starts_with("Reminder"))
        .collect();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].subject, "Reminder: Spring Hackathon starts soon!");
}

#[rstest]
#[tokio::test]
async fn pending_registrations_get_no_reminder(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::hours(6)).await;

    let enqueued = seeded
        .engine
        .maintenance
        .enqueue_upcoming_reminders()
        .await
        .expect("reminder scan");

    assert_eq!(enqueued, 0);
    assert!(seeded.engine.queue.jobs(QueueName::Reminder).is_empty());
}

#[rstest]
#[tokio::test]
async fn sweep_removes_expired_idempotency_records(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    assert_eq!(engine.idempotency_records.len(), 1);

    let early = engine.maintenance.sweep().await.expect("sweep");
    assert_eq!(early.idempotency_records, 0);

    engine.clock.advance(Duration::from_secs(25 * 3600));
    let report = engine.maintenance.sweep().await.expect("sweep");

    assert_eq!(report.idempotency_records, 1);
    assert!(engine.idempotency_records.is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_loop_delivers_until_shutdown(now: DateTime<Utc>) {
    let seeded = registered(now, chrono::Duration::days(3)).await;
    let engine = &seeded.engine;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(engine.worker.clone().run(shutdown_rx));

    for _ in 0..500 {
        if !engine.mailbox.delivered().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    shutdown_tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker stops on shutdown")
        .expect("worker task");

    assert_eq!(engine.mailbox.delivered().len(), 1);
    assert_eq!(status_of(&seeded).await, RegistrationStatus::Confirmed);
    assert!(!engine
        .locks
        .is_locked(&LockKey::competition(seeded.competition_id)));
}
