//! Background job model shared by the queue, the worker and the dead-letter
//! store.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CompetitionId, JobId, RegistrationDetails, RegistrationId, UserId};

/// Named queues served by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Post-registration confirmation mail.
    Registration,
    /// Start-of-competition reminders.
    Reminder,
}

impl QueueName {
    pub const ALL: [Self; 2] = [Self::Registration, Self::Reminder];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Reminder => "reminder",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown queue name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue: {0}")]
pub struct ParseQueueNameError(pub String);

impl FromStr for QueueName {
    type Err = ParseQueueNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "registration" => Ok(Self::Registration),
            "reminder" => Ok(Self::Reminder),
            other => Err(ParseQueueNameError(other.to_owned())),
        }
    }
}

/// Data needed to confirm a registration and mail the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationJob {
    pub registration_id: RegistrationId,
    pub user_id: UserId,
    pub competition_id: CompetitionId,
    pub user_email: String,
    pub user_name: String,
    pub competition_title: String,
    #[serde(default)]
    pub competition_start: Option<DateTime<Utc>>,
}

impl From<&RegistrationDetails> for ConfirmationJob {
    fn from(details: &RegistrationDetails) -> Self {
        Self {
            registration_id: details.registration.id,
            user_id: details.registration.user_id,
            competition_id: details.competition.id,
            user_email: details.participant.email.clone(),
            user_name: details.participant.name.clone(),
            competition_title: details.competition.title.clone(),
            competition_start: details.competition.start_date,
        }
    }
}

/// Data needed to remind a confirmed participant about an upcoming start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderJob {
    pub registration_id: RegistrationId,
    pub user_id: UserId,
    pub competition_id: CompetitionId,
    pub user_email: String,
    pub user_name: String,
    pub competition_title: String,
    pub competition_start: DateTime<Utc>,
}

impl ReminderJob {
    /// Build a reminder when the competition has a start date.
    pub fn for_details(details: &RegistrationDetails) -> Option<Self> {
        let competition_start = details.competition.start_date?;
        Some(Self {
            registration_id: details.registration.id,
            user_id: details.registration.user_id,
            competition_id: details.competition.id,
            user_email: details.participant.email.clone(),
            user_name: details.participant.name.clone(),
            competition_title: details.competition.title.clone(),
            competition_start,
        })
    }
}

/// Typed job body; the tag doubles as the job name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", content = "data")]
pub enum JobPayload {
    #[serde(rename = "confirmation")]
    Confirmation(ConfirmationJob),
    #[serde(rename = "notify")]
    Reminder(ReminderJob),
}

impl JobPayload {
    /// Queue this payload is delivered on.
    pub const fn queue(&self) -> QueueName {
        match self {
            Self::Confirmation(_) => QueueName::Registration,
            Self::Reminder(_) => QueueName::Reminder,
        }
    }

    pub const fn job_name(&self) -> &'static str {
        match self {
            Self::Confirmation(_) => "confirmation",
            Self::Reminder(_) => "notify",
        }
    }

    pub const fn registration_id(&self) -> RegistrationId {
        match self {
            Self::Confirmation(job) => job.registration_id,
            Self::Reminder(job) => job.registration_id,
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(2_000);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(300);

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            max: Self::DEFAULT_MAX,
        }
    }
}

/// Delivery options attached to every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl JobOptions {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Job ready to be handed to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: JobId,
    pub payload: JobPayload,
    pub options: JobOptions,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    /// Job that is eligible for delivery at `now`.
    pub fn immediate(payload: JobPayload, options: JobOptions, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::random(),
            payload,
            options,
            run_at: now,
            created_at: now,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.payload.queue()
    }
}

/// Job reserved by a worker.
///
/// `attempts` already counts the delivery that produced this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub options: JobOptions,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.options.max_attempts
    }

    /// True when this delivery only happened because the lease on the final
    /// attempt ran out; the job must not run again.
    pub fn lease_outlived_attempts(&self) -> bool {
        self.attempts > self.options.max_attempts
    }

    /// Fencing token for settling this delivery.
    pub const fn lease(&self) -> JobLease {
        JobLease {
            job_id: self.id,
            attempt: self.attempts,
        }
    }
}

/// Identifies one delivery of a job.
///
/// Queues accept a settlement only while the job is still active on the
/// same attempt, so a worker whose lease ran out cannot overwrite the result
/// of the worker that picked the job up next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLease {
    pub job_id: JobId,
    pub attempt: u32,
}

/// Storage state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Eligible now, or scheduled for later when `run_at` is in the future.
    Waiting,
    /// Leased by a worker.
    Active,
    Completed,
    /// Retries exhausted; a copy lives in the dead-letter store.
    Failed,
}

impl JobState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown job state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct ParseJobStateError(pub String);

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseJobStateError(other.to_owned())),
        }
    }
}

/// Per-queue job counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    /// Eligible for delivery now.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Scheduled for a later retry.
    pub delayed: u64,
    pub paused: bool,
}

impl QueueStats {
    /// Jobs still to be processed.
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }
}

/// Dead-lettered job kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub job_id: JobId,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2_000)]
    #[case(2, 4_000)]
    #[case(3, 8_000)]
    #[case(9, 300_000)]
    #[case(u32::MAX, 300_000)]
    fn backoff_doubles_until_cap(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(attempt), Duration::from_millis(expected_ms));
    }

    #[rstest]
    fn payload_tag_matches_job_name() {
        let payload = JobPayload::Reminder(ReminderJob {
            registration_id: RegistrationId::random(),
            user_id: UserId::random(),
            competition_id: CompetitionId::random(),
            user_email: "ada@example.com".to_owned(),
            user_name: "Ada".to_owned(),
            competition_title: "Spring Open".to_owned(),
            competition_start: Utc::now(),
        });
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["job"], payload.job_name());
        assert_eq!(json["data"]["competitionTitle"], "Spring Open");
        assert_eq!(payload.queue(), QueueName::Reminder);
    }

    #[rstest]
    fn queue_names_round_trip_through_text() {
        for queue in QueueName::ALL {
            assert_eq!(queue.as_str().parse::<QueueName>(), Ok(queue));
        }
        assert!("emails".parse::<QueueName>().is_err());
    }

    #[rstest]
    fn total_excludes_finished_jobs() {
        let stats = QueueStats {
            waiting: 2,
            active: 1,
            completed: 10,
            failed: 4,
            delayed: 3,
            paused: false,
        };
        assert_eq!(stats.total(), 6);
    }
}
