//! Process-local mailbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::ports::{Mailbox, MailboxError};
use crate::domain::{MailId, MailMessage, NewMail, UserId};

/// Mailbox that can be switched off to simulate a delivery outage.
pub struct InMemoryMailbox {
    messages: Mutex<Vec<MailMessage>>,
    available: AtomicBool,
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivered message in delivery order.
    pub fn delivered(&self) -> Vec<MailMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn deliver(&self, mail: &NewMail) -> Result<MailMessage, MailboxError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MailboxError::connection("mail relay unavailable"));
        }
        let message = MailMessage::from_new(MailId::random(), mail);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(message)
    }

    async fn inbox(&self, user_id: UserId) -> Result<Vec<MailMessage>, MailboxError> {
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|message| message.user_id == user_id)
            .cloned()
            .collect())
    }
}
