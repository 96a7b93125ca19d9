//! # Real-Time Errors
//!
//! Failures that end a streaming connection. Errors that leave the
//! connection open travel as error frames instead.

use thiserror::Error;

use crate::auth::AuthError;
use crate::consultation::SessionError;
use crate::store::StoreError;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Real-time errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Handshake Errors
    // ==================
    /// Missing, invalid or expired access token
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Caller is not a participant, or is inactive
    #[error("Forbidden")]
    Forbidden,

    #[error("Consultation not found")]
    NotFound,

    /// Consultation completed before the connection was accepted
    #[error("Consultation is closed")]
    SessionClosed,

    // ==================
    // Delivery Errors
    // ==================
    /// Outbound queue overflowed; the connection was dropped from fan-out
    #[error("Connection fell behind")]
    Lagged,

    // ==================
    // Internal Errors
    // ==================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Returns the close code for WebSocket
    pub fn close_code(&self) -> u16 {
        match self {
            RealtimeError::AuthenticationFailed => 4001,
            RealtimeError::Forbidden => 4003,
            RealtimeError::NotFound => 4004,
            RealtimeError::SessionClosed => 4009,
            RealtimeError::Lagged => 4008,
            RealtimeError::Internal(_) => 1011,
        }
    }
}

impl From<StoreError> for RealtimeError {
    fn from(e: StoreError) -> Self {
        RealtimeError::Internal(e.to_string())
    }
}

impl From<AuthError> for RealtimeError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InactiveIdentity => RealtimeError::Forbidden,
            AuthError::Store(e) => RealtimeError::Internal(e.to_string()),
            AuthError::TokenGenerationFailed => RealtimeError::Internal(e.to_string()),
            _ => RealtimeError::AuthenticationFailed,
        }
    }
}

impl From<SessionError> for RealtimeError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AccessDenied => RealtimeError::Forbidden,
            SessionError::NotFound => RealtimeError::NotFound,
            SessionError::SessionClosed | SessionError::InvalidTransition => {
                RealtimeError::SessionClosed
            }
            other => RealtimeError::Internal(other.to_string()),
        }
    }
}
