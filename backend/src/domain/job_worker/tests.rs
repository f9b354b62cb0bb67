//! Settlement coverage for the job worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rstest::{fixture, rstest};
use tokio::sync::watch;

use super::*;
use crate::domain::ports::{
    CompetitionLedgerError, FailedJobRepositoryError, MockCompetitionLedger,
    MockFailedJobRepository, MockJobQueue, MockMailbox,
};
use crate::domain::{
    CompetitionId, ConfirmationJob, JobLease, JobOptions, MailId, MailMessage, Registration,
    RegistrationId, RegistrationStatus, UserId,
};
use crate::test_support::{ImmediateSleeper, MutableClock, NoJitter};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 4, 12, 0, 0)
        .single()
        .expect("fixed timestamp")
}

#[fixture]
fn confirmation() -> ConfirmationJob {
    ConfirmationJob {
        registration_id: RegistrationId::random(),
        user_id: UserId::random(),
        competition_id: CompetitionId::random(),
        user_email: "noor@example.com".to_owned(),
        user_name: "Noor".to_owned(),
        competition_title: "Summer Sprint".to_owned(),
        competition_start: None,
    }
}

fn leased(payload: ConfirmationJob, attempts: u32) -> Job {
    Job {
        id: JobId::random(),
        queue: QueueName::Registration,
        payload: JobPayload::Confirmation(payload),
        options: JobOptions::default(),
        attempts,
        created_at: now(),
    }
}

fn registration(job: &ConfirmationJob, status: RegistrationStatus) -> Registration {
    Registration {
        id: job.registration_id,
        user_id: job.user_id,
        competition_id: job.competition_id,
        status,
        idempotency_key: None,
        registered_at: now(),
    }
}

fn queue_serving(job: Job) -> MockJobQueue {
    let mut queue = MockJobQueue::new();
    let mut pending = Some(job);
    queue
        .expect_reserve()
        .withf(|_, at, lease_until| *at == now() && *lease_until == now() + TimeDelta::seconds(30))
        .returning(move |_, _, _| Ok(pending.take()));
    queue
}

fn worker(
    queue: MockJobQueue,
    failed_jobs: MockFailedJobRepository,
    ledger: MockCompetitionLedger,
    mailbox: MockMailbox,
) -> JobWorker {
    JobWorker::new(
        JobWorkerPorts {
            queue: Arc::new(queue),
            failed_jobs: Arc::new(failed_jobs),
            ledger: Arc::new(ledger),
            mailbox: Arc::new(mailbox),
        },
        JobWorkerRuntime {
            clock: Arc::new(MutableClock::new(now())),
            sleeper: Arc::new(ImmediateSleeper),
            jitter: Arc::new(NoJitter),
        },
        JobWorkerConfig::default(),
    )
}

fn delivering_mailbox(times: usize) -> MockMailbox {
    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_deliver()
        .times(times)
        .returning(|mail| Ok(MailMessage::from_new(MailId::random(), mail)));
    mailbox
}

#[rstest]
#[tokio::test]
async fn empty_queue_yields_nothing() {
    let mut queue = MockJobQueue::new();
    queue.expect_reserve().returning(|_, _, _| Ok(None));

    let outcome = worker(
        queue,
        MockFailedJobRepository::new(),
        MockCompetitionLedger::new(),
        MockMailbox::new(),
    )
    .process_next(QueueName::Registration)
    .await
    .expect("poll");
    assert_eq!(outcome, None);
}

#[rstest]
#[tokio::test]
async fn pending_registration_is_mailed_then_confirmed(confirmation: ConfirmationJob) {
    let job = leased(confirmation.clone(), 1);
    let job_id = job.id;
    let mut queue = queue_serving(job);
    queue
        .expect_complete()
        .withf(move |lease, _| *lease == JobLease { job_id, attempt: 1 })
        .times(1)
        .returning(|_, _| Ok(()));
    let pending = registration(&confirmation, RegistrationStatus::Pending);
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(move |_| Ok(Some(pending.clone())));
    ledger
        .expect_mark_confirmed()
        .times(1)
        .returning(|_| Ok(true));
    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_deliver()
        .withf(|mail| mail.subject == "Registration Confirmed: Summer Sprint")
        .times(1)
        .returning(|mail| Ok(MailMessage::from_new(MailId::random(), mail)));

    let outcome = worker(queue, MockFailedJobRepository::new(), ledger, mailbox)
        .process_next(QueueName::Registration)
        .await
        .expect("settled");
    assert_eq!(
        outcome,
        Some(JobOutcome::Completed {
            job_id,
            handled: HandledJob::Confirmed
        })
    );
}

#[rstest]
#[case(Some(RegistrationStatus::Confirmed), HandledJob::AlreadyConfirmed)]
#[case(None, HandledJob::RegistrationMissing)]
#[case(Some(RegistrationStatus::Cancelled), HandledJob::ConfirmationSkipped)]
#[case(Some(RegistrationStatus::Failed), HandledJob::ConfirmationSkipped)]
#[tokio::test]
async fn redelivered_confirmation_has_no_side_effects(
    #[case] status: Option<RegistrationStatus>,
    #[case] expected: HandledJob,
    confirmation: ConfirmationJob,
) {
    let job = leased(confirmation.clone(), 2);
    let mut queue = queue_serving(job);
    queue.expect_complete().times(1).returning(|_, _| Ok(()));
    let stored = status.map(|status| registration(&confirmation, status));
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(move |_| Ok(stored.clone()));
    ledger.expect_mark_confirmed().never();

    let outcome = worker(queue, MockFailedJobRepository::new(), ledger, delivering_mailbox(0))
        .process_next(QueueName::Registration)
        .await
        .expect("settled");
    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed { handled, .. }) if handled == expected
    ));
}

#[rstest]
#[tokio::test]
async fn registration_cancelled_mid_delivery_stays_cancelled(confirmation: ConfirmationJob) {
    let job = leased(confirmation.clone(), 1);
    let mut queue = queue_serving(job);
    queue.expect_complete().times(1).returning(|_, _| Ok(()));
    let pending = registration(&confirmation, RegistrationStatus::Pending);
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(move |_| Ok(Some(pending.clone())));
    ledger
        .expect_mark_confirmed()
        .times(1)
        .returning(|_| Ok(false));

    let outcome = worker(queue, MockFailedJobRepository::new(), ledger, delivering_mailbox(1))
        .process_next(QueueName::Registration)
        .await
        .expect("settled");

    assert!(matches!(
        outcome,
        Some(JobOutcome::Completed {
            handled: HandledJob::ConfirmationSkipped,
            ..
        })
    ));
}

#[rstest]
#[case(1, 2_000)]
#[case(2, 4_000)]
#[tokio::test]
async fn transient_failure_is_retried_with_backoff(
    #[case] attempts: u32,
    #[case] delay_ms: i64,
    confirmation: ConfirmationJob,
) {
    let job = leased(confirmation, attempts);
    let job_id = job.id;
    let expected_run_at = now() + TimeDelta::milliseconds(delay_ms);
    let mut queue = queue_serving(job);
    queue
        .expect_retry_later()
        .withf(move |lease, run_at, error| {
            lease.job_id == job_id
                && lease.attempt == attempts
                && *run_at == expected_run_at
                && error.contains("connection")
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(|_| Err(CompetitionLedgerError::connection("connection reset")));
    let mut failed_jobs = MockFailedJobRepository::new();
    failed_jobs.expect_record().never();

    let outcome = worker(queue, failed_jobs, ledger, MockMailbox::new())
        .process_next(QueueName::Registration)
        .await
        .expect("settled");
    assert_eq!(
        outcome,
        Some(JobOutcome::Retrying {
            job_id,
            attempt: attempts,
            run_at: expected_run_at
        })
    );
}

#[rstest]
#[tokio::test]
async fn exhausted_job_is_dead_lettered(confirmation: ConfirmationJob) {
    let job = leased(confirmation, 3);
    let job_id = job.id;
    let mut queue = queue_serving(job);
    queue.expect_retry_later().never();
    queue
        .expect_mark_failed()
        .withf(move |lease, _, _| *lease == JobLease { job_id, attempt: 3 })
        .times(1)
        .returning(|_, _, _| Ok(()));
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(|_| Err(CompetitionLedgerError::query("relation does not exist")));
    let mut failed_jobs = MockFailedJobRepository::new();
    failed_jobs
        .expect_record()
        .withf(move |failed| {
            failed.job_id == job_id
                && failed.attempts == 3
                && failed.queue == QueueName::Registration
                && failed.error.contains("relation does not exist")
                && failed.failed_at == now()
        })
        .times(1)
        .returning(|_| Ok(true));

    let outcome = worker(queue, failed_jobs, ledger, MockMailbox::new())
        .process_next(QueueName::Registration)
        .await
        .expect("settled");
    assert_eq!(
        outcome,
        Some(JobOutcome::DeadLettered {
            job_id,
            attempts: 3
        })
    );
}

#[rstest]
#[tokio::test]
async fn failed_dead_letter_write_keeps_job_leased(confirmation: ConfirmationJob) {
    let job = leased(confirmation, 3);
    let mut queue = queue_serving(job);
    queue.expect_mark_failed().never();
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(|_| Err(CompetitionLedgerError::query("boom")));
    let mut failed_jobs = MockFailedJobRepository::new();
    failed_jobs
        .expect_record()
        .returning(|_| Err(FailedJobRepositoryError::connection("dlq offline")));

    let error = worker(queue, failed_jobs, ledger, MockMailbox::new())
        .process_next(QueueName::Registration)
        .await
        .expect_err("dead letter failed");
    assert!(matches!(error, JobWorkerError::DeadLetter(_)));
}

#[rstest]
#[tokio::test]
async fn redelivery_past_the_final_lease_is_dead_lettered_unrun(confirmation: ConfirmationJob) {
    let job = leased(confirmation, 4);
    let job_id = job.id;
    let mut queue = queue_serving(job);
    queue.expect_complete().never();
    queue.expect_retry_later().never();
    queue
        .expect_mark_failed()
        .withf(move |lease, error, _| {
            *lease == JobLease { job_id, attempt: 4 } && error.contains("lease expired")
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    let mut ledger = MockCompetitionLedger::new();
    ledger.expect_registration().never();
    let mut failed_jobs = MockFailedJobRepository::new();
    failed_jobs
        .expect_record()
        .withf(move |failed| failed.job_id == job_id && failed.attempts == 3)
        .times(1)
        .returning(|_| Ok(true));

    let outcome = worker(queue, failed_jobs, ledger, delivering_mailbox(0))
        .process_next(QueueName::Registration)
        .await
        .expect("settled");

    assert_eq!(
        outcome,
        Some(JobOutcome::DeadLettered {
            job_id,
            attempts: 3
        })
    );
}

#[rstest]
#[tokio::test]
async fn completion_after_losing_the_lease_is_discarded(confirmation: ConfirmationJob) {
    let job = leased(confirmation.clone(), 1);
    let job_id = job.id;
    let mut queue = queue_serving(job);
    queue
        .expect_complete()
        .returning(move |lease, _| Err(JobQueueError::stale_lease(lease.job_id, lease.attempt)));
    let confirmed = registration(&confirmation, RegistrationStatus::Confirmed);
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(move |_| Ok(Some(confirmed.clone())));

    let outcome = worker(queue, MockFailedJobRepository::new(), ledger, delivering_mailbox(0))
        .process_next(QueueName::Registration)
        .await
        .expect("stale lease is not an infrastructure failure");

    assert_eq!(outcome, Some(JobOutcome::LeaseLost { job_id, attempt: 1 }));
}

#[rstest]
#[tokio::test]
async fn queue_outage_while_settling_is_an_error(confirmation: ConfirmationJob) {
    let job = leased(confirmation.clone(), 1);
    let mut queue = queue_serving(job);
    queue
        .expect_complete()
        .returning(|_, _| Err(JobQueueError::connection("pool exhausted")));
    let confirmed = registration(&confirmation, RegistrationStatus::Confirmed);
    let mut ledger = MockCompetitionLedger::new();
    ledger
        .expect_registration()
        .returning(move |_| Ok(Some(confirmed.clone())));

    let error = worker(queue, MockFailedJobRepository::new(), ledger, delivering_mailbox(0))
        .process_next(QueueName::Registration)
        .await
        .expect_err("queue offline");

    assert!(matches!(error, JobWorkerError::Queue(JobQueueError::Connection { .. })));
}

#[rstest]
#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let mut queue = MockJobQueue::new();
    queue.expect_reserve().returning(|_, _, _| Ok(None));
    let worker = Arc::new(JobWorker::new(
        JobWorkerPorts {
            queue: Arc::new(queue),
            failed_jobs: Arc::new(MockFailedJobRepository::new()),
            ledger: Arc::new(MockCompetitionLedger::new()),
            mailbox: Arc::new(MockMailbox::new()),
        },
        JobWorkerRuntime {
            clock: Arc::new(MutableClock::new(now())),
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(NoJitter),
        },
        JobWorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            lease: Duration::from_secs(30),
        },
    ));
    let (shutdown, receiver) = watch::channel(false);

    let handle = tokio::spawn(worker.run(receiver));
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.send(true).expect("worker listening");

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker stops promptly")
        .expect("worker task");
}
