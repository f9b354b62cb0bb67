//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `migrations/` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// Participants known to the engine.
    users (id) {
        id -> Uuid,
        name -> Text,
        email -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Competitions and their seat counters.
    ///
    /// `seats_left` is constrained to `0..=capacity`; `version` increments on
    /// every seat change.
    competitions (id) {
        id -> Uuid,
        title -> Text,
        description -> Text,
        capacity -> Int4,
        seats_left -> Int4,
        reg_deadline -> Timestamptz,
        start_date -> Nullable<Timestamptz>,
        version -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Seat claims. At most one non-cancelled row per user and competition.
    registrations (id) {
        id -> Uuid,
        user_id -> Uuid,
        competition_id -> Uuid,
        /// One of `PENDING`, `CONFIRMED`, `CANCELLED`, `FAILED`.
        status -> Text,
        idempotency_key -> Nullable<Text>,
        registered_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Durable tier of the idempotency store.
    idempotency_records (key) {
        key -> Text,
        /// Serialised registration replayed on retry.
        response -> Jsonb,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    /// Work queue rows for every named queue.
    jobs (id) {
        id -> Uuid,
        queue -> Text,
        payload -> Jsonb,
        /// One of `waiting`, `active`, `completed`, `failed`.
        state -> Text,
        attempts -> Int4,
        max_attempts -> Int4,
        backoff_base_ms -> Int8,
        backoff_max_ms -> Int8,
        run_at -> Timestamptz,
        lease_until -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Queues currently withheld from delivery.
    paused_queues (queue) {
        queue -> Text,
        paused_at -> Timestamptz,
    }
}

diesel::table! {
    /// Dead-lettered jobs keyed by their original job id.
    failed_jobs (job_id) {
        job_id -> Uuid,
        queue -> Text,
        payload -> Jsonb,
        error -> Text,
        attempts -> Int4,
        failed_at -> Timestamptz,
    }
}

diesel::table! {
    /// Delivered participant mail.
    mailbox (id) {
        id -> Uuid,
        user_id -> Uuid,
        recipient -> Text,
        subject -> Text,
        body -> Text,
        sent_at -> Timestamptz,
    }
}

diesel::joinable!(registrations -> users (user_id));
diesel::joinable!(registrations -> competitions (competition_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    competitions,
    registrations,
    idempotency_records,
    jobs,
    paused_queues,
    failed_jobs,
    mailbox,
);
