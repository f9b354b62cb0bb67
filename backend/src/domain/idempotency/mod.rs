//! Idempotent replay of registration results.
//!
//! - [`IdempotencyKey`]: validated client key, compared exactly.
//! - [`IdempotencyRecord`]: stored registration result with its expiry.
//! - [`IdempotencyConfig`]: retention window.
//! - [`IdempotencyService`]: cache-then-durable lookup and dual-tier writes.

mod config;
mod key;
mod record;
mod service;

pub use config::IdempotencyConfig;
pub use key::{
    IDEMPOTENCY_KEY_MAX_LEN, IDEMPOTENCY_KEY_MIN_LEN, IdempotencyKey,
    IdempotencyKeyValidationError,
};
pub use record::IdempotencyRecord;
pub use service::IdempotencyService;
