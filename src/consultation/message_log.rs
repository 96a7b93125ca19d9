//! Append-only message log.
//!
//! Existence, status and membership are checked by the store inside the
//! insert transaction. This layer only validates the content itself.

use std::sync::Arc;

use uuid::Uuid;

use super::errors::{SessionError, SessionResult};
use super::model::{Message, MessageKind};
use crate::store::{AppendOutcome, MessageRepository};

/// Default upper bound on message content
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

pub struct MessageLog<S> {
    store: Arc<S>,
    max_message_bytes: usize,
}

impl<S: MessageRepository> MessageLog<S> {
    pub fn new(store: Arc<S>, max_message_bytes: usize) -> Self {
        Self {
            store,
            max_message_bytes,
        }
    }

    /// Reject blank or oversized content
    pub fn validate_content(&self, content: &str) -> SessionResult<()> {
        if content.trim().is_empty() {
            return Err(SessionError::InvalidSend("message is empty".to_string()));
        }
        if content.len() > self.max_message_bytes {
            return Err(SessionError::InvalidSend(format!(
                "message exceeds {} bytes",
                self.max_message_bytes
            )));
        }
        Ok(())
    }

    /// Durably append an ordinary message
    pub fn append(&self, consultation_id: Uuid, sender_id: Uuid, content: &str) -> SessionResult<Message> {
        self.validate_content(content)?;

        let draft = Message::new(
            consultation_id,
            sender_id,
            content.to_string(),
            MessageKind::Ordinary,
        );
        match self.store.append_message(&draft)? {
            AppendOutcome::Appended(message) => Ok(message),
            AppendOutcome::ConsultationMissing => Err(SessionError::NotFound),
            AppendOutcome::ConsultationClosed => Err(SessionError::SessionClosed),
            AppendOutcome::NotMember => Err(SessionError::InvalidSend(
                "sender is not a participant".to_string(),
            )),
        }
    }

    /// Every message of the consultation, oldest first
    pub fn history(&self, consultation_id: Uuid) -> SessionResult<Vec<Message>> {
        Ok(self.store.list_messages(consultation_id)?)
    }
}
