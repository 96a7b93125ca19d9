//! # Session Registry
//!
//! Owns consultation lifecycle and membership.
//!
//! ## Invariants
//! - `client_id != expert_id`, membership fixed at creation
//! - A consultation and its opening message are created together or not
//!   at all
//! - `active -> completed` happens exactly once; a second close is an
//!   error the caller sees

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::errors::{SessionError, SessionResult};
use super::message_log::MessageLog;
use super::model::{Consultation, ConsultationStatus, ConsultationView, Message, MessageKind};
use crate::auth::identity::Role;
use crate::observability::Event;
use crate::store::Store;

/// Content of the notice appended when a consultation closes
pub const CLOSE_NOTICE: &str = "Consultation closed";

/// Consultation lifecycle and authorization
pub struct SessionRegistry<S> {
    store: Arc<S>,
    log: Arc<MessageLog<S>>,
}

impl<S: Store> SessionRegistry<S> {
    pub fn new(store: Arc<S>, log: Arc<MessageLog<S>>) -> Self {
        Self { store, log }
    }

    /// Open a consultation with its first message.
    ///
    /// Both parties must be existing active identities with roles
    /// `client` and `expert`.
    pub fn create(
        &self,
        client_id: Uuid,
        expert_id: Uuid,
        initial_message: &str,
    ) -> SessionResult<ConsultationView> {
        if client_id == expert_id {
            return Err(SessionError::InvalidParticipant(
                "client and expert must be different identities".to_string(),
            ));
        }
        self.require_participant(client_id, Role::Client)?;
        self.require_participant(expert_id, Role::Expert)?;
        self.log.validate_content(initial_message)?;

        let consultation = Consultation::new(client_id, expert_id);
        let seed = Message::new(
            consultation.id,
            client_id,
            initial_message.to_string(),
            MessageKind::Ordinary,
        );
        let seed = self.store.create_consultation(&consultation, &seed)?;

        info!(
            event = %Event::ConsultationCreated,
            consultation_id = %consultation.id,
            client_id = %client_id,
            expert_id = %expert_id,
            "Consultation created"
        );

        Ok(ConsultationView {
            consultation,
            messages: vec![seed],
        })
    }

    fn require_participant(&self, identity_id: Uuid, role: Role) -> SessionResult<()> {
        match self.store.find_identity(identity_id)? {
            Some(identity) if identity.is_active && identity.role == role => Ok(()),
            Some(identity) if !identity.is_active => Err(SessionError::InvalidParticipant(
                format!("{role} {identity_id} is inactive"),
            )),
            Some(_) => Err(SessionError::InvalidParticipant(format!(
                "identity {identity_id} is not a {role}"
            ))),
            None => Err(SessionError::InvalidParticipant(format!(
                "{role} {identity_id} does not exist"
            ))),
        }
    }

    /// Succeeds iff the caller is the client or the expert
    pub fn authorize(&self, consultation: &Consultation, caller_id: Uuid) -> SessionResult<()> {
        if consultation.is_member(caller_id) {
            Ok(())
        } else {
            Err(SessionError::AccessDenied)
        }
    }

    pub fn find(&self, consultation_id: Uuid) -> SessionResult<Consultation> {
        self.store
            .find_consultation(consultation_id)?
            .ok_or(SessionError::NotFound)
    }

    /// Load a consultation the caller belongs to
    pub fn load_authorized(&self, consultation_id: Uuid, caller_id: Uuid) -> SessionResult<Consultation> {
        let consultation = self.find(consultation_id)?;
        self.authorize(&consultation, caller_id)?;
        Ok(consultation)
    }

    /// Complete a consultation and append the closing notice.
    ///
    /// Live connections are not told here; close through
    /// [`crate::realtime::ConnectionManager::close`] to broadcast the notice.
    pub fn close(&self, consultation_id: Uuid, caller_id: Uuid) -> SessionResult<(Consultation, Message)> {
        let consultation = self.load_authorized(consultation_id, caller_id)?;
        if !consultation.is_active() {
            return Err(SessionError::InvalidTransition);
        }

        let notice = Message::new(
            consultation_id,
            caller_id,
            CLOSE_NOTICE.to_string(),
            MessageKind::System,
        );
        // A concurrent close may have won since the read above
        let (closed, notice) = self
            .store
            .complete_consultation(consultation_id, crate::store::now(), &notice)?
            .ok_or(SessionError::InvalidTransition)?;

        info!(
            event = %Event::ConsultationClosed,
            consultation_id = %consultation_id,
            closed_by = %caller_id,
            "Consultation closed"
        );
        Ok((closed, notice))
    }

    /// Active consultations of the participant, most recent first
    pub fn list_active(&self, participant_id: Uuid, limit: Option<usize>) -> SessionResult<Vec<Consultation>> {
        Ok(self
            .store
            .list_consultations(participant_id, ConsultationStatus::Active, limit)?)
    }

    /// Completed consultations of the participant, most recent first
    pub fn list_completed(&self, participant_id: Uuid) -> SessionResult<Vec<Consultation>> {
        Ok(self
            .store
            .list_consultations(participant_id, ConsultationStatus::Completed, None)?)
    }

    /// A consultation with its full history, for a member
    pub fn get_with_history(&self, consultation_id: Uuid, caller_id: Uuid) -> SessionResult<ConsultationView> {
        let consultation = self.load_authorized(consultation_id, caller_id)?;
        let messages = self.log.history(consultation_id)?;
        Ok(ConsultationView {
            consultation,
            messages,
        })
    }
}
