//! # Identity Model
//!
//! Canonical identity record shared by every component. Provider-specific
//! profile data never gets past [`IdentityAssertion`]; everything after
//! federation sees only [`Identity`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role assigned to an identity at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Expert,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Expert => "expert",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Role::Client),
            "expert" => Some(Role::Expert),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Linkedin,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Linkedin => "linkedin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "linkedin" => Some(Provider::Linkedin),
            _ => None,
        }
    }

    /// Role given to identities first seen through this provider.
    ///
    /// Clients sign in with Google, experts with LinkedIn.
    pub fn default_role(&self) -> Role {
        match self {
            Provider::Google => Role::Client,
            Provider::Linkedin => Role::Expert,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Immutable unique identifier
    pub id: Uuid,

    /// Email address (unique across identities)
    pub email: String,

    /// Display name, refreshed from the provider on each sign-in
    pub display_name: Option<String>,

    /// Role, fixed at creation
    pub role: Role,

    /// Inactive identities cannot authenticate
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new active identity
    pub fn new(email: String, display_name: Option<String>, role: Role) -> Self {
        let now = crate::store::now();
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Verified identity assertion from an external provider, already
/// normalized to the canonical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssertion {
    pub provider: Provider,
    pub provider_subject_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl IdentityAssertion {
    /// Build an assertion, trimming and lower-casing the email and
    /// dropping blank display names.
    pub fn new(
        provider: Provider,
        provider_subject_id: impl Into<String>,
        email: &str,
        display_name: Option<&str>,
    ) -> Self {
        Self {
            provider,
            provider_subject_id: provider_subject_id.into(),
            email: normalize_email(email),
            display_name: display_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        }
    }
}

/// Lower-cased, trimmed email used as the cross-provider join key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
