//! # Auth Errors
//!
//! Error types for the credential layer. None of these reach session
//! logic: the HTTP and streaming boundaries turn them into an
//! authentication failure first.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication errors
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    // ==================
    // Credential Errors
    // ==================
    /// Signature or structure invalid
    #[error("Malformed credential")]
    MalformedCredential,

    /// `exp` has passed
    #[error("Credential expired")]
    ExpiredCredential,

    /// Access token presented where a refresh token is required, or the
    /// other way round
    #[error("Wrong credential kind")]
    WrongCredentialKind,

    /// No token in cookie or header
    #[error("Not authenticated")]
    MissingCredential,

    // ==================
    // Identity Errors
    // ==================
    /// Token subject does not resolve to an identity
    #[error("Unknown identity")]
    UnknownIdentity,

    #[error("Identity is inactive")]
    InactiveIdentity,

    /// External identity assertion rejected
    #[error("Invalid identity assertion: {0}")]
    InvalidAssertion(String),

    // ==================
    // Internal Errors
    // ==================
    #[error("Internal error: token generation failed")]
    TokenGenerationFailed,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MalformedCredential
            | AuthError::ExpiredCredential
            | AuthError::WrongCredentialKind
            | AuthError::MissingCredential
            | AuthError::UnknownIdentity
            | AuthError::InvalidAssertion(_) => 401,

            AuthError::InactiveIdentity => 403,

            AuthError::TokenGenerationFailed => 500,
            AuthError::Store(_) => 503,
        }
    }

    /// Whether the caller is at fault (logged at debug, not error)
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}
