//! Port for participant mail delivery.
//!
//! Delivery writes an entry to the participant's mailbox; transport to a real
//! mail provider is outside the engine.

use async_trait::async_trait;

use crate::domain::{MailMessage, NewMail, UserId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by mailbox adapters.
    pub enum MailboxError {
        /// Mailbox backend connection could not be established.
        Connection { message: String } => "mailbox connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "mailbox query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Append `mail` to the recipient's mailbox.
    async fn deliver(&self, mail: &NewMail) -> Result<MailMessage, MailboxError>;

    /// Messages for `user_id`, oldest first.
    async fn inbox(&self, user_id: UserId) -> Result<Vec<MailMessage>, MailboxError>;
}
