//! Fully wired engine over in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{ImmediateSleeper, MutableClock, NoJitter};
use crate::domain::ports::CompetitionLedger;
use crate::domain::{
    Competition, CompetitionDraft, CompetitionId, IdempotencyConfig, IdempotencyService,
    JobWorker, JobWorkerConfig, JobWorkerPorts, JobWorkerRuntime, MaintenanceConfig,
    MaintenanceService, ParticipantContact, RegistrationCoordinator,
    RegistrationCoordinatorConfig, RegistrationCoordinatorPorts, UserId,
};
use crate::outbound::memory::{
    InMemoryCompetitionLedger, InMemoryFailedJobRepository, InMemoryIdempotencyCache,
    InMemoryIdempotencyRepository, InMemoryJobQueue, InMemoryLockManager, InMemoryMailbox,
};

/// Every adapter is exposed so tests can seed and inspect state directly.
pub struct InMemoryEngine {
    pub clock: Arc<MutableClock>,
    pub ledger: Arc<InMemoryCompetitionLedger>,
    pub locks: Arc<InMemoryLockManager>,
    pub cache: Arc<InMemoryIdempotencyCache>,
    pub idempotency_records: Arc<InMemoryIdempotencyRepository>,
    pub queue: Arc<InMemoryJobQueue>,
    pub failed_jobs: Arc<InMemoryFailedJobRepository>,
    pub mailbox: Arc<InMemoryMailbox>,
    pub coordinator: Arc<RegistrationCoordinator>,
    pub worker: Arc<JobWorker>,
    pub maintenance: MaintenanceService,
}

impl InMemoryEngine {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::build(now, None)
    }

    /// Route coordinator seat claims through `ledger` instead of the
    /// in-memory ledger. The worker and maintenance still use the latter.
    pub fn with_coordinator_ledger(now: DateTime<Utc>, ledger: Arc<dyn CompetitionLedger>) -> Self {
        Self::build(now, Some(ledger))
    }

    fn build(now: DateTime<Utc>, coordinator_ledger: Option<Arc<dyn CompetitionLedger>>) -> Self {
        let clock = Arc::new(MutableClock::new(now));
        let ledger = Arc::new(InMemoryCompetitionLedger::new());
        let locks = Arc::new(InMemoryLockManager::new(clock.clone()));
        let cache = Arc::new(InMemoryIdempotencyCache::new(clock.clone()));
        let idempotency_records = Arc::new(InMemoryIdempotencyRepository::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let failed_jobs = Arc::new(InMemoryFailedJobRepository::new());
        let mailbox = Arc::new(InMemoryMailbox::new());

        let idempotency = IdempotencyService::new(
            cache.clone(),
            idempotency_records.clone(),
            clock.clone(),
            IdempotencyConfig::default(),
        );
        let seat_ledger: Arc<dyn CompetitionLedger> = match coordinator_ledger {
            Some(custom) => custom,
            None => ledger.clone(),
        };
        let coordinator = RegistrationCoordinator::new(
            RegistrationCoordinatorPorts {
                idempotency: idempotency.clone(),
                locks: locks.clone(),
                ledger: seat_ledger,
                queue: queue.clone(),
            },
            clock.clone(),
            RegistrationCoordinatorConfig {
                lock_ttl: Duration::from_secs(15),
                transaction_timeout: Duration::from_secs(10),
                ..RegistrationCoordinatorConfig::default()
            },
        );
        let worker = JobWorker::new(
            JobWorkerPorts {
                queue: queue.clone(),
                failed_jobs: failed_jobs.clone(),
                ledger: ledger.clone(),
                mailbox: mailbox.clone(),
            },
            JobWorkerRuntime {
                clock: clock.clone(),
                sleeper: Arc::new(ImmediateSleeper),
                jitter: Arc::new(NoJitter),
            },
            JobWorkerConfig {
                concurrency: 1,
                ..JobWorkerConfig::default()
            },
        );
        let maintenance = MaintenanceService::new(
            ledger.clone(),
            queue.clone(),
            failed_jobs.clone(),
            idempotency,
            clock.clone(),
            MaintenanceConfig::default(),
        );

        Self {
            clock,
            ledger,
            locks,
            cache,
            idempotency_records,
            queue,
            failed_jobs,
            mailbox,
            coordinator: Arc::new(coordinator),
            worker: Arc::new(worker),
            maintenance,
        }
    }

    /// Seed a participant with a derived mail address.
    pub fn add_user(&self, name: &str) -> UserId {
        let id = UserId::random();
        self.ledger.add_user(
            id,
            ParticipantContact {
                name: name.to_owned(),
                email: format!("{}@example.com", name.to_lowercase()),
            },
        );
        id
    }

    /// Seed an open competition.
    pub fn add_competition(
        &self,
        title: &str,
        capacity: u32,
        reg_deadline: DateTime<Utc>,
        start_date: Option<DateTime<Utc>>,
    ) -> CompetitionId {
        let id = CompetitionId::random();
        let draft = CompetitionDraft {
            id,
            title: title.to_owned(),
            description: String::new(),
            capacity,
            reg_deadline,
            start_date,
        };
        match Competition::open(draft) {
            Ok(competition) => self.ledger.add_competition(competition),
            Err(error) => panic!("invalid test competition: {error}"),
        }
        id
    }
}
