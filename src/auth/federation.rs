//! # Identity Federation
//!
//! Turns a verified external identity assertion into the canonical
//! [`Identity`], creating or linking it on first sighting.
//!
//! Resolution is an idempotent upsert. Concurrent first sign-ins for the
//! same person are settled by the store's unique constraints on email
//! and on `(provider, provider_subject_id)`: the loser of the race gets
//! a conflict and retries, and on retry finds the winner's record.

use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::errors::{AuthError, AuthResult};
use super::identity::{Identity, IdentityAssertion, Provider};
use crate::observability::Event;
use crate::store::IdentityRepository;

/// Attempts before a persistent conflict is reported
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Federation gateway
pub struct IdentityFederationGateway<S> {
    store: Arc<S>,
}

impl<S: IdentityRepository> IdentityFederationGateway<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get-or-create the identity behind an assertion.
    ///
    /// 1. Existing link: return the linked identity, refreshing the
    ///    display name if the provider reports a new one.
    /// 2. Existing email: link it to this provider subject.
    /// 3. Otherwise create the identity and its link together.
    pub fn resolve(&self, assertion: &IdentityAssertion) -> AuthResult<Identity> {
        let mut attempt = 1;
        loop {
            match self.try_resolve(assertion) {
                Err(AuthError::Store(e)) if e.is_conflict() && attempt < MAX_RESOLVE_ATTEMPTS => {
                    debug!(
                        provider = %assertion.provider,
                        attempt,
                        error = %e,
                        "Identity resolution raced, retrying"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn try_resolve(&self, assertion: &IdentityAssertion) -> AuthResult<Identity> {
        let store = &self.store;

        if let Some(identity) =
            store.find_identity_by_link(assertion.provider, &assertion.provider_subject_id)?
        {
            return self.refresh_display_name(identity, assertion);
        }

        if let Some(identity) = store.find_identity_by_email(&assertion.email)? {
            store.link_identity(
                identity.id,
                assertion.provider,
                &assertion.provider_subject_id,
            )?;
            info!(
                event = %Event::IdentityLinked,
                identity_id = %identity.id,
                provider = %assertion.provider,
                "Linked existing identity to provider"
            );
            return self.refresh_display_name(identity, assertion);
        }

        let identity = Identity::new(
            assertion.email.clone(),
            assertion.display_name.clone(),
            assertion.provider.default_role(),
        );
        store.create_identity_with_link(
            &identity,
            assertion.provider,
            &assertion.provider_subject_id,
        )?;
        info!(
            event = %Event::IdentityCreated,
            identity_id = %identity.id,
            provider = %assertion.provider,
            role = %identity.role,
            "Created identity"
        );
        Ok(identity)
    }

    fn refresh_display_name(
        &self,
        mut identity: Identity,
        assertion: &IdentityAssertion,
    ) -> AuthResult<Identity> {
        // A provider that omits the name leaves the stored one alone
        let Some(name) = assertion.display_name.as_deref() else {
            return Ok(identity);
        };
        if identity.display_name.as_deref() != Some(name) {
            let updated_at = crate::store::now();
            self.store.update_display_name(identity.id, Some(name), updated_at)?;
            identity.display_name = Some(name.to_string());
            identity.updated_at = updated_at;
        }
        Ok(identity)
    }
}

// ==================
// Signed assertions
// ==================

/// Broker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Shared HS256 secret of the OAuth broker. Empty until configured.
    #[serde(default)]
    pub broker_secret: String,

    /// Expected `iss` of broker assertions
    #[serde(default = "default_assertion_issuer")]
    pub assertion_issuer: String,
}

fn default_assertion_issuer() -> String {
    "quickconsult-oauth".to_string()
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            broker_secret: String::new(),
            assertion_issuer: default_assertion_issuer(),
        }
    }
}

/// Claims carried by a broker assertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub provider: String,
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub iss: String,
    pub exp: i64,
}

/// Verifies assertions handed over by the OAuth broker
pub struct SignedAssertionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SignedAssertionVerifier {
    pub fn new(config: &FederationConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&config.assertion_issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            key: DecodingKey::from_secret(config.broker_secret.as_bytes()),
            validation,
        }
    }

    /// Check signature, issuer and expiry, then normalize
    pub fn verify(&self, token: &str) -> AuthResult<IdentityAssertion> {
        let claims = decode::<AssertionClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidAssertion(e.to_string()))?
            .claims;

        let provider = Provider::parse(&claims.provider).ok_or_else(|| {
            AuthError::InvalidAssertion(format!("unknown provider: {}", claims.provider))
        })?;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidAssertion("missing subject".to_string()));
        }

        let email = claims
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::InvalidAssertion("missing email".to_string()))?;

        Ok(IdentityAssertion::new(
            provider,
            claims.sub.trim(),
            email,
            claims.name.as_deref(),
        ))
    }
}
