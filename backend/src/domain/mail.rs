//! Participant mail rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ConfirmationJob, MailId, ReminderJob, UserId};

/// Mail ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMail {
    pub user_id: UserId,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Delivered mailbox entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: MailId,
    pub user_id: UserId,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl MailMessage {
    pub fn from_new(id: MailId, mail: &NewMail) -> Self {
        Self {
            id,
            user_id: mail.user_id,
            to: mail.to.clone(),
            subject: mail.subject.clone(),
            body: mail.body.clone(),
            sent_at: mail.sent_at,
        }
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Confirmation mail sent once a registration is confirmed.
pub fn confirmation_mail(job: &ConfirmationJob, now: DateTime<Utc>) -> NewMail {
    let mut body = format!(
        "Hello {name},\n\nYour registration for \"{title}\" is confirmed.\n",
        name = job.user_name,
        title = job.competition_title,
    );
    if let Some(start) = job.competition_start {
        body.push_str(&format!(
            "The competition starts on {}.\n",
            start.format(DATE_FORMAT)
        ));
    }
    body.push_str(&format!("\nRegistration reference: {}\n", job.registration_id));
    NewMail {
        user_id: job.user_id,
        to: job.user_email.clone(),
        subject: format!("Registration Confirmed: {}", job.competition_title),
        body,
        sent_at: now,
    }
}

/// Reminder mail sent ahead of the competition start.
pub fn reminder_mail(job: &ReminderJob, now: DateTime<Utc>) -> NewMail {
    let body = format!(
        "Hello {name},\n\n\"{title}\" starts on {start}. Good luck!\n",
        name = job.user_name,
        title = job.competition_title,
        start = job.competition_start.format(DATE_FORMAT),
    );
    NewMail {
        user_id: job.user_id,
        to: job.user_email.clone(),
        subject: format!("Reminder: {} starts soon!", job.competition_title),
        body,
        sent_at: now,
    }
}
