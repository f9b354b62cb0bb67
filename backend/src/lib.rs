//! Concurrency-safe competition registration engine.
//!
//! The [`domain`] module holds the registration coordinator, job worker and
//! their ports; [`outbound`] provides Redis, PostgreSQL and in-memory
//! adapters for those ports.

pub mod domain;
pub mod outbound;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
