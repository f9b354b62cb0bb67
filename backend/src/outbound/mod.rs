//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL ledger, durable idempotency tier, job queue,
//!   dead-letter store and mailbox using Diesel ORM
//! - **cache**: Redis volatile idempotency tier
//! - **lock**: Redis distributed lock manager
//! - **memory**: single-process adapters for tests and local runs
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. Business decisions stay in the
//! domain.

pub mod cache;
pub mod lock;
pub mod memory;
pub mod persistence;
pub mod redis_pool;
