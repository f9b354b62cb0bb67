//! In-process adapters that honour every port contract.
//!
//! Used by the test suites and by embedders that run the engine without
//! external infrastructure. Each adapter keeps its state behind a mutex and
//! never holds it across an await point.

mod failed_jobs;
mod idempotency;
mod job_queue;
mod ledger;
mod lock_manager;
mod mailbox;

pub use failed_jobs::InMemoryFailedJobRepository;
pub use idempotency::{InMemoryIdempotencyCache, InMemoryIdempotencyRepository};
pub use job_queue::{InMemoryJobQueue, JobSnapshot};
pub use ledger::InMemoryCompetitionLedger;
pub use lock_manager::InMemoryLockManager;
pub use mailbox::InMemoryMailbox;
