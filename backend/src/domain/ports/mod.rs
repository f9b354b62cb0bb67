//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod competition_ledger;
mod failed_job_repository;
mod idempotency_cache;
mod idempotency_repository;
mod job_queue;
mod lock_manager;
mod mailbox;

#[cfg(test)]
pub use competition_ledger::MockCompetitionLedger;
pub use competition_ledger::{CompetitionLedger, CompetitionLedgerError};
#[cfg(test)]
pub use failed_job_repository::MockFailedJobRepository;
pub use failed_job_repository::{FailedJobRepository, FailedJobRepositoryError};
#[cfg(test)]
pub use idempotency_cache::MockIdempotencyCache;
pub use idempotency_cache::{FixtureIdempotencyCache, IdempotencyCache, IdempotencyCacheError};
#[cfg(test)]
pub use idempotency_repository::MockIdempotencyRepository;
pub use idempotency_repository::{
    FixtureIdempotencyRepository, IdempotencyRepository, IdempotencyRepositoryError,
};
#[cfg(test)]
pub use job_queue::MockJobQueue;
pub use job_queue::{JobQueue, JobQueueError};
#[cfg(test)]
pub use lock_manager::MockLockManager;
pub use lock_manager::{FixtureLockManager, LockManager, LockManagerError};
#[cfg(test)]
pub use mailbox::MockMailbox;
pub use mailbox::{Mailbox, MailboxError};
