//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the ledger, durable idempotency tier, job
//! queue, dead-letter store and mailbox ports, backed by PostgreSQL through
//! `diesel-async` and a shared `bb8` pool.
//!
//! # Architecture
//!
//! - **Thin adapters**: implementations translate between Diesel rows and
//!   domain types. Business rules that must hold under concurrency (seat
//!   checks, version guard, lease selection) run inside SQL so PostgreSQL
//!   enforces them.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) never leave this module.
//! - **Strongly typed errors**: every Diesel error maps onto the owning port's
//!   error enum.
//!
//! # Example
//!
//! ```ignore
//! use compete_backend::outbound::persistence::{DbPool, DieselCompetitionLedger, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/compete")).await?;
//! let ledger = DieselCompetitionLedger::new(pool.clone());
//! ```

mod diesel_basic_error_mapping;
mod diesel_competition_ledger;
mod diesel_failed_job_repository;
mod diesel_idempotency_repository;
mod diesel_job_queue;
mod diesel_mailbox;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_competition_ledger::DieselCompetitionLedger;
pub use diesel_failed_job_repository::DieselFailedJobRepository;
pub use diesel_idempotency_repository::DieselIdempotencyRepository;
pub use diesel_job_queue::DieselJobQueue;
pub use diesel_mailbox::DieselMailbox;
pub use migrations::{MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
