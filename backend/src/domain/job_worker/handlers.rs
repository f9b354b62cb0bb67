//! Job handlers for confirmation and reminder mail.
//!
//! Both handlers tolerate redelivery: a job for a registration that no longer
//! exists completes without side effects, and a confirmation only acts on a
//! registration that is still `PENDING`.

use std::sync::Arc;

use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::mail::{confirmation_mail, reminder_mail};
use crate::domain::ports::{CompetitionLedger, CompetitionLedgerError, Mailbox, MailboxError};
use crate::domain::{ConfirmationJob, RegistrationStatus, ReminderJob};

/// Failure of a single job attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobHandlerError {
    retryable: bool,
    message: String,
}

impl JobHandlerError {
    /// Failure that may clear up on a later attempt.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// Failure that no amount of retrying will fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<CompetitionLedgerError> for JobHandlerError {
    fn from(error: CompetitionLedgerError) -> Self {
        Self::transient(error.to_string())
    }
}

impl From<MailboxError> for JobHandlerError {
    fn from(error: MailboxError) -> Self {
        Self::transient(error.to_string())
    }
}

/// What a successful handler run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledJob {
    /// Mail sent and registration confirmed.
    Confirmed,
    /// Registration was already confirmed; nothing sent.
    AlreadyConfirmed,
    /// Registration no longer exists; nothing sent.
    RegistrationMissing,
    /// Registration was cancelled or failed before confirmation.
    ConfirmationSkipped,
    ReminderSent,
    /// Registration is no longer confirmed; nothing sent.
    ReminderSkipped,
}

/// Sends the confirmation mail and flips the registration to `CONFIRMED`.
pub struct ConfirmationHandler {
    ledger: Arc<dyn CompetitionLedger>,
    mailbox: Arc<dyn Mailbox>,
    clock: Arc<dyn Clock>,
}

impl ConfirmationHandler {
    pub fn new(
        ledger: Arc<dyn CompetitionLedger>,
        mailbox: Arc<dyn Mailbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            mailbox,
            clock,
        }
    }

    /// Mail goes out before the status flips, so a crash in between resends
    /// mail rather than losing it.
    pub async fn handle(&self, job: &ConfirmationJob) -> Result<HandledJob, JobHandlerError> {
        let Some(registration) = self.ledger.registration(job.registration_id).await? else {
            info!(registration_id = %job.registration_id, "registration gone; skipping confirmation");
            return Ok(HandledJob::RegistrationMissing);
        };
        match registration.status {
            RegistrationStatus::Pending => {}
            RegistrationStatus::Confirmed => {
                debug!(registration_id = %job.registration_id, "registration already confirmed");
                return Ok(HandledJob::AlreadyConfirmed);
            }
            RegistrationStatus::Cancelled | RegistrationStatus::Failed => {
                info!(
                    registration_id = %job.registration_id,
                    status = registration.status.as_str(),
                    "registration no longer pending; skipping confirmation"
                );
                return Ok(HandledJob::ConfirmationSkipped);
            }
        }

        let mail = confirmation_mail(job, self.clock.utc());
        self.mailbox.deliver(&mail).await?;
        if !self.ledger.mark_confirmed(job.registration_id).await? {
            warn!(
                registration_id = %job.registration_id,
                "registration left PENDING while the mail was sent; status unchanged"
            );
            return Ok(HandledJob::ConfirmationSkipped);
        }
        info!(registration_id = %job.registration_id, "registration confirmed");
        Ok(HandledJob::Confirmed)
    }
}

/// Sends the start-of-competition reminder.
pub struct ReminderHandler {
    ledger: Arc<dyn CompetitionLedger>,
    mailbox: Arc<dyn Mailbox>,
    clock: Arc<dyn Clock>,
}

impl ReminderHandler {
    pub fn new(
        ledger: Arc<dyn CompetitionLedger>,
        mailbox: Arc<dyn Mailbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            mailbox,
            clock,
        }
    }

    pub async fn handle(&self, job: &ReminderJob) -> Result<HandledJob, JobHandlerError> {
        let still_confirmed = self
            .ledger
            .registration(job.registration_id)
            .await?
            .is_some_and(|registration| registration.status == RegistrationStatus::Confirmed);
        if !still_confirmed {
            info!(registration_id = %job.registration_id, "registration not confirmed; skipping reminder");
            return Ok(HandledJob::ReminderSkipped);
        }

        let mail = reminder_mail(job, self.clock.utc());
        self.mailbox.deliver(&mail).await?;
        info!(registration_id = %job.registration_id, "reminder sent");
        Ok(HandledJob::ReminderSent)
    }
}
