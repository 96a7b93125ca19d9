//! Consultation and message records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status. Transitions only `Active -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Active,
    Completed,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Active => "active",
            ConsultationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConsultationStatus::Active),
            "completed" => Some(ConsultationStatus::Completed),
            _ => None,
        }
    }
}

/// A bounded two-party conversation between one client and one expert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub expert_id: Uuid,
    pub status: ConsultationStatus,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the consultation completes
    pub ended_at: Option<DateTime<Utc>>,
}

impl Consultation {
    /// New active consultation
    pub fn new(client_id: Uuid, expert_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            expert_id,
            status: ConsultationStatus::Active,
            created_at: crate::store::now(),
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConsultationStatus::Active
    }

    /// Whether the identity is one of the two fixed participants
    pub fn is_member(&self, identity_id: Uuid) -> bool {
        identity_id == self.client_id || identity_id == self.expert_id
    }
}

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Written by a participant
    Ordinary,
    /// Generated by the service on behalf of a participant
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Ordinary => "ordinary",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ordinary" => Some(MessageKind::Ordinary),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// An immutable stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Draft a message. The store may move `created_at` forward to keep
    /// timestamps non-decreasing within a consultation.
    pub fn new(consultation_id: Uuid, sender_id: Uuid, content: String, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            consultation_id,
            sender_id,
            content,
            kind,
            created_at: crate::store::now(),
        }
    }
}

/// A consultation together with its ordered history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsultationView {
    #[serde(flatten)]
    pub consultation: Consultation,
    pub messages: Vec<Message>,
}
