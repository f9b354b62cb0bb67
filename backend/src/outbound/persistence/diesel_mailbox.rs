//! PostgreSQL-backed mailbox; delivery is an insert into `mailbox`.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{Mailbox, MailboxError};
use crate::domain::{MailId, MailMessage, NewMail, UserId};

use super::diesel_basic_error_mapping::{map_basic_diesel_error, map_basic_pool_error};
use super::models::MailRow;
use super::pool::{DbPool, PoolError};
use super::schema::mailbox;

#[derive(Clone)]
pub struct DieselMailbox {
    pool: DbPool,
}

impl DieselMailbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> MailboxError {
    map_basic_pool_error(error, MailboxError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> MailboxError {
    map_basic_diesel_error(error, MailboxError::query, MailboxError::connection)
}

fn row_to_message(row: MailRow) -> MailMessage {
    MailMessage {
        id: MailId::from_uuid(row.id),
        user_id: UserId::from_uuid(row.user_id),
        to: row.recipient,
        subject: row.subject,
        body: row.body,
        sent_at: row.sent_at,
    }
}

#[async_trait]
impl Mailbox for DieselMailbox {
    async fn deliver(&self, mail: &NewMail) -> Result<MailMessage, MailboxError> {
        let message = MailMessage::from_new(MailId::random(), mail);
        let row = MailRow {
            id: *message.id.as_uuid(),
            user_id: *message.user_id.as_uuid(),
            recipient: message.to.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            sent_at: message.sent_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        diesel::insert_into(mailbox::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(message)
    }

    async fn inbox(&self, user_id: UserId) -> Result<Vec<MailMessage>, MailboxError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<MailRow> = mailbox::table
            .filter(mailbox::user_id.eq(user_id.as_uuid()))
            .order(mailbox::sent_at.asc())
            .select(MailRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }
}
