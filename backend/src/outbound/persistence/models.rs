//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. They exist solely to satisfy Diesel's
//! type requirements for queries and mutations.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{
    competitions, failed_jobs, idempotency_records, jobs, mailbox, registrations, users,
};

// ---------------------------------------------------------------------------
// Ledger models
// ---------------------------------------------------------------------------

/// Row struct for reading from the users table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Row struct for reading from the competitions table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = competitions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct CompetitionRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub capacity: i32,
    pub seats_left: i32,
    pub reg_deadline: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub version: i64,
}

/// Row struct for reading from the registrations table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = registrations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct RegistrationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub competition_id: Uuid,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Insertable struct for creating registration records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = registrations)]
pub(crate) struct NewRegistrationRow<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub competition_id: Uuid,
    pub status: &'a str,
    pub idempotency_key: Option<&'a str>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Idempotency models
// ---------------------------------------------------------------------------

/// Row struct for reading from the idempotency_records table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = idempotency_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct IdempotencyRecordRow {
    pub key: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Insertable struct for creating idempotency records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = idempotency_records)]
pub(crate) struct NewIdempotencyRecordRow<'a> {
    pub key: &'a str,
    pub response: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Job queue models
// ---------------------------------------------------------------------------

/// Row struct for jobs, readable from both the DSL and raw `RETURNING` SQL.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct JobRow {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for enqueueing jobs.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub(crate) struct NewJobRow<'a> {
    pub id: Uuid,
    pub queue: &'a str,
    pub payload: &'a serde_json::Value,
    pub state: &'a str,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Row struct for reading from the failed_jobs table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = failed_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct FailedJobRow {
    pub job_id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub failed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Mailbox models
// ---------------------------------------------------------------------------

/// Row struct for the mailbox table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = mailbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct MailRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}
