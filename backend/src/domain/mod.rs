//! Domain primitives, ports and services for competition registration.
//!
//! Public surface:
//! - Identifiers: [`UserId`], [`CompetitionId`], [`RegistrationId`], [`JobId`].
//! - Aggregates: [`Competition`], [`Registration`] and their projections.
//! - Services: [`RegistrationCoordinator`], [`JobWorker`],
//!   [`MaintenanceService`], [`IdempotencyService`].
//! - Errors: [`RegistrationError`] with its stable [`ErrorCode`].

pub mod competition;
pub mod error;
pub mod idempotency;
pub mod ids;
pub mod job_worker;
pub mod jobs;
pub mod lock;
pub mod mail;
pub mod maintenance;
pub mod ports;
pub mod registration;
pub mod registration_coordinator;

pub use self::competition::{
    Competition, CompetitionDraft, CompetitionSummary, CompetitionValidationError,
};
pub use self::error::{ErrorCode, RegistrationError};
pub use self::idempotency::{
    IdempotencyConfig, IdempotencyKey, IdempotencyKeyValidationError, IdempotencyRecord,
    IdempotencyService,
};
pub use self::ids::{CompetitionId, JobId, MailId, RegistrationId, UserId};
pub use self::job_worker::{
    BackoffJitter, HandledJob, JobHandlerError, JobOutcome, JobWorker, JobWorkerConfig,
    JobWorkerError, JobWorkerPorts, JobWorkerRuntime, RandomJitter, TokioSleeper, WorkerSleeper,
};
pub use self::jobs::{
    BackoffPolicy, ConfirmationJob, FailedJob, Job, JobLease, JobOptions, JobPayload, JobState,
    NewJob, ParseJobStateError, ParseQueueNameError, QueueName, QueueStats, ReminderJob,
};
pub use self::lock::{LockGuard, LockKey, OwnerToken};
pub use self::mail::{MailMessage, NewMail};
pub use self::maintenance::{
    MaintenanceConfig, MaintenanceError, MaintenanceService, SweepReport,
};
pub use self::registration::{
    ParseRegistrationStatusError, ParticipantContact, Registration, RegistrationDetails,
    RegistrationStatus, SeatRequest,
};
pub use self::registration_coordinator::{
    RegistrationCoordinator, RegistrationCoordinatorConfig, RegistrationCoordinatorPorts,
    RegistrationRequest,
};
