//! Test utilities for the backend crate.
//!
//! Shared by unit tests in `src/` and integration tests in `tests/`, which
//! enable the `test-support` feature.

mod clock;
mod engine;
mod worker;

pub use clock::MutableClock;
pub use engine::InMemoryEngine;
pub use worker::{ImmediateSleeper, NoJitter, RecordingSleeper};
