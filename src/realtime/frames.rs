//! Streaming wire frames.
//!
//! Inbound: `{"content": "..."}`.
//! Outbound: a message frame `{id, content, sender_id, created_at, kind}`
//! or an error frame `{"error": {"code", "message"}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consultation::{Message, MessageKind, SessionError};

/// Error frame codes
pub mod codes {
    pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
    pub const INVALID_SEND: &str = "INVALID_SEND";
    pub const INVALID_FRAME: &str = "INVALID_FRAME";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
}

/// Frame sent by a participant
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    pub content: String,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A persisted message as delivered to live connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorBody,
}

/// Frame sent to a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Message(MessageFrame),
    Error(ErrorFrame),
}

impl OutboundFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutboundFrame::Error(ErrorFrame {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        })
    }

    /// Inbound frame could not be understood
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::error(codes::INVALID_FRAME, reason)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&Message> for OutboundFrame {
    fn from(message: &Message) -> Self {
        OutboundFrame::Message(MessageFrame {
            id: message.id,
            content: message.content.clone(),
            sender_id: message.sender_id,
            created_at: message.created_at,
            kind: message.kind,
        })
    }
}

impl From<&SessionError> for OutboundFrame {
    fn from(e: &SessionError) -> Self {
        Self::error(e.frame_code(), e.to_string())
    }
}
