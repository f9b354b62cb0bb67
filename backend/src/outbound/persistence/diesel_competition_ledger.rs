//! PostgreSQL-backed `CompetitionLedger` implementation using Diesel ORM.
//!
//! # Seat claims
//!
//! `register_seat` runs in one `SERIALIZABLE` transaction with a local
//! `statement_timeout`. The seat decrement is guarded by the competition's
//! `version` column, so a concurrent writer that slipped past the
//! distributed lock makes the update touch zero rows. Both that case and
//! PostgreSQL serialization failures surface as
//! [`CompetitionLedgerError::Conflict`].
//!
//! The partial unique index `registrations_active_pair_idx` and the unique
//! constraint on `idempotency_key` back the in-transaction checks; violations
//! are classified by constraint name.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::ports::{CompetitionLedger, CompetitionLedgerError};
use crate::domain::{
    Competition, CompetitionDraft, CompetitionId, IdempotencyKey, ParticipantContact,
    Registration, RegistrationDetails, RegistrationId, RegistrationStatus, SeatRequest, UserId,
};

use super::diesel_basic_error_mapping::{
    is_contention, log_diesel_error, map_basic_diesel_error, map_basic_pool_error,
    violated_unique_constraint,
};
use super::models::{CompetitionRow, NewRegistrationRow, RegistrationRow, UserRow};
use super::pool::{DbPool, PoolError};
use super::schema::{competitions, registrations, users};

const ACTIVE_PAIR_CONSTRAINT: &str = "registrations_active_pair_idx";
const IDEMPOTENCY_KEY_CONSTRAINT: &str = "registrations_idempotency_key_unique";

/// Diesel-backed seat ledger.
#[derive(Clone)]
pub struct DieselCompetitionLedger {
    pool: DbPool,
    statement_timeout: Duration,
}

impl DieselCompetitionLedger {
    /// Ledger with a 10 second statement timeout.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            statement_timeout: Duration::from_secs(10),
        }
    }

    /// Bound every statement in a seat claim.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

/// Outcome of the seat transaction before it is flattened to a port error.
#[derive(Debug)]
enum SeatTransactionError {
    /// A business rule rejected the claim; the transaction rolls back.
    Rejected(CompetitionLedgerError),
    Database(diesel::result::Error),
}

impl From<diesel::result::Error> for SeatTransactionError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Database(error)
    }
}

impl From<CompetitionLedgerError> for SeatTransactionError {
    fn from(error: CompetitionLedgerError) -> Self {
        Self::Rejected(error)
    }
}

fn map_pool_error(error: PoolError) -> CompetitionLedgerError {
    map_basic_pool_error(error, CompetitionLedgerError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> CompetitionLedgerError {
    map_basic_diesel_error(
        error,
        CompetitionLedgerError::query,
        CompetitionLedgerError::connection,
    )
}

/// Classify a seat-claim database failure.
fn map_seat_error(error: diesel::result::Error, request: &SeatRequest) -> CompetitionLedgerError {
    if is_contention(&error) {
        log_diesel_error(&error);
        return CompetitionLedgerError::conflict("concurrent seat update");
    }
    match violated_unique_constraint(&error) {
        Some(ACTIVE_PAIR_CONSTRAINT) => {
            CompetitionLedgerError::already_registered(request.user_id, request.competition_id)
        }
        Some(IDEMPOTENCY_KEY_CONSTRAINT) => CompetitionLedgerError::duplicate_idempotency_key(),
        _ => map_diesel_error(error),
    }
}

fn row_to_competition(row: CompetitionRow) -> Result<Competition, CompetitionLedgerError> {
    let capacity = u32::try_from(row.capacity)
        .map_err(|_| CompetitionLedgerError::query("negative capacity in database"))?;
    let seats_left = u32::try_from(row.seats_left)
        .map_err(|_| CompetitionLedgerError::query("negative seat count in database"))?;
    let draft = CompetitionDraft {
        id: CompetitionId::from_uuid(row.id),
        title: row.title,
        description: row.description,
        capacity,
        reg_deadline: row.reg_deadline,
        start_date: row.start_date,
    };
    Competition::restore(draft, seats_left, row.version).map_err(|err| {
        CompetitionLedgerError::query(format!("invalid competition in database: {err}"))
    })
}

fn row_to_registration(row: RegistrationRow) -> Result<Registration, CompetitionLedgerError> {
    let status = RegistrationStatus::from_str(&row.status).map_err(|err| {
        CompetitionLedgerError::query(format!("invalid registration status in database: {err}"))
    })?;
    let idempotency_key = row
        .idempotency_key
        .map(IdempotencyKey::new)
        .transpose()
        .map_err(|err| {
            CompetitionLedgerError::query(format!("invalid idempotency key in database: {err}"))
        })?;
    Ok(Registration {
        id: RegistrationId::from_uuid(row.id),
        user_id: UserId::from_uuid(row.user_id),
        competition_id: CompetitionId::from_uuid(row.competition_id),
        status,
        idempotency_key,
        registered_at: row.registered_at,
    })
}

/// Body of the seat transaction. Checks run in the ledger contract order.
async fn claim_seat(
    conn: &mut AsyncPgConnection,
    request: &SeatRequest,
    statement_timeout: Duration,
) -> Result<RegistrationDetails, SeatTransactionError> {
    // SET does not accept bind parameters; the value is an integer.
    diesel::sql_query(format!(
        "SET LOCAL statement_timeout = {}",
        statement_timeout.as_millis()
    ))
    .execute(conn)
    .await?;

    let competition_row: Option<CompetitionRow> = competitions::table
        .find(*request.competition_id.as_uuid())
        .select(CompetitionRow::as_select())
        .first(conn)
        .await
        .optional()?;
    let Some(competition_row) = competition_row else {
        return Err(CompetitionLedgerError::not_found(request.competition_id).into());
    };
    let competition = row_to_competition(competition_row)?;

    if !competition.accepts_registrations_at(request.requested_at) {
        return Err(CompetitionLedgerError::deadline_passed(competition.reg_deadline()).into());
    }

    let active: Option<uuid::Uuid> = registrations::table
        .filter(registrations::user_id.eq(request.user_id.as_uuid()))
        .filter(registrations::competition_id.eq(request.competition_id.as_uuid()))
        .filter(registrations::status.ne(RegistrationStatus::Cancelled.as_str()))
        .select(registrations::id)
        .first(conn)
        .await
        .optional()?;
    if active.is_some() {
        return Err(CompetitionLedgerError::already_registered(
            request.user_id,
            request.competition_id,
        )
        .into());
    }

    if competition.is_full() {
        return Err(CompetitionLedgerError::full().into());
    }

    if let Some(key) = &request.idempotency_key {
        let holder: Option<uuid::Uuid> = registrations::table
            .filter(registrations::idempotency_key.eq(key.as_ref()))
            .select(registrations::id)
            .first(conn)
            .await
            .optional()?;
        if holder.is_some() {
            return Err(CompetitionLedgerError::duplicate_idempotency_key().into());
        }
    }

    let participant: Option<UserRow> = users::table
        .find(*request.user_id.as_uuid())
        .select(UserRow::as_select())
        .first(conn)
        .await
        .optional()?;
    let Some(participant) = participant else {
        return Err(CompetitionLedgerError::query(format!("unknown user {}", request.user_id)).into());
    };

    let updated = diesel::update(
        competitions::table
            .filter(competitions::id.eq(request.competition_id.as_uuid()))
            .filter(competitions::version.eq(competition.version()))
            .filter(competitions::seats_left.gt(0)),
    )
    .set((
        competitions::seats_left.eq(competitions::seats_left - 1),
        competitions::version.eq(competitions::version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(CompetitionLedgerError::conflict(
            "competition version changed during registration",
        )
        .into());
    }

    let registration = Registration::pending(request);
    let new_row = NewRegistrationRow {
        id: *registration.id.as_uuid(),
        user_id: *registration.user_id.as_uuid(),
        competition_id: *registration.competition_id.as_uuid(),
        status: registration.status.as_str(),
        idempotency_key: registration.idempotency_key.as_ref().map(AsRef::as_ref),
        registered_at: registration.registered_at,
        updated_at: registration.registered_at,
    };
    diesel::insert_into(registrations::table)
        .values(&new_row)
        .execute(conn)
        .await?;

    Ok(RegistrationDetails {
        registration,
        participant: ParticipantContact {
            name: participant.name,
            email: participant.email,
        },
        competition: competition.summary(),
    })
}

#[async_trait]
impl CompetitionLedger for DieselCompetitionLedger {
    async fn register_seat(
        &self,
        request: &SeatRequest,
    ) -> Result<RegistrationDetails, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let statement_timeout = self.statement_timeout;

        let outcome = conn
            .build_transaction()
            .serializable()
            .run(|conn| async move { claim_seat(conn, request, statement_timeout).await }.scope_boxed())
            .await;

        match outcome {
            Ok(details) => {
                debug!(
                    registration_id = %details.registration.id,
                    competition_id = %request.competition_id,
                    "seat claimed"
                );
                Ok(details)
            }
            Err(SeatTransactionError::Rejected(error)) => Err(error),
            Err(SeatTransactionError::Database(error)) => Err(map_seat_error(error, request)),
        }
    }

    async fn registration(
        &self,
        id: RegistrationId,
    ) -> Result<Option<Registration>, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<RegistrationRow> = registrations::table
            .find(*id.as_uuid())
            .select(RegistrationRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(row_to_registration).transpose()
    }

    async fn registration_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Registration>, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<RegistrationRow> = registrations::table
            .filter(registrations::idempotency_key.eq(key.as_ref()))
            .select(RegistrationRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(row_to_registration).transpose()
    }

    async fn mark_confirmed(&self, id: RegistrationId) -> Result<bool, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            registrations::table
                .filter(registrations::id.eq(*id.as_uuid()))
                .filter(registrations::status.eq(RegistrationStatus::Pending.as_str())),
        )
        .set((
            registrations::status.eq(RegistrationStatus::Confirmed.as_str()),
            registrations::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        if updated > 0 {
            return Ok(true);
        }

        let exists: Option<uuid::Uuid> = registrations::table
            .find(*id.as_uuid())
            .select(registrations::id)
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(CompetitionLedgerError::query(format!(
                "unknown registration {id}"
            ))),
        }
    }

    async fn registrations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Registration>, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<RegistrationRow> = registrations::table
            .filter(registrations::user_id.eq(user_id.as_uuid()))
            .order((registrations::registered_at.desc(), registrations::id.desc()))
            .select(RegistrationRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_registration).collect()
    }

    async fn registrations_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Vec<Registration>, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<RegistrationRow> = registrations::table
            .filter(registrations::competition_id.eq(competition_id.as_uuid()))
            .order((registrations::registered_at.asc(), registrations::id.asc()))
            .select(RegistrationRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_registration).collect()
    }

    async fn confirmed_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RegistrationDetails>, CompetitionLedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<(RegistrationRow, UserRow, CompetitionRow)> = registrations::table
            .inner_join(users::table)
            .inner_join(competitions::table)
            .filter(registrations::status.eq(RegistrationStatus::Confirmed.as_str()))
            .filter(competitions::start_date.ge(from))
            .filter(competitions::start_date.le(to))
            .order(competitions::start_date.asc())
            .select((
                RegistrationRow::as_select(),
                UserRow::as_select(),
                CompetitionRow::as_select(),
            ))
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows.into_iter()
            .map(|(registration, user, competition)| {
                Ok(RegistrationDetails {
                    registration: row_to_registration(registration)?,
                    participant: ParticipantContact {
                        name: user.name,
                        email: user.email,
                    },
                    competition: row_to_competition(competition)?.summary(),
                })
            })
            .collect()
    }
}
