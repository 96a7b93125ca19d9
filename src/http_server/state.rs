//! Shared application state.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{
    cookies, AuthError, AuthResult, CredentialAuthority, Identity, IdentityFederationGateway,
    SignedAssertionVerifier, TokenCookies, TokenKind,
};
use crate::config::AppConfig;
use crate::consultation::{MessageLog, SessionRegistry};
use crate::realtime::ConnectionManager;
use crate::store::{IdentityRepository, SqliteStore};

/// Components shared by every handler
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub credentials: CredentialAuthority,
    pub cookies: TokenCookies,
    pub federation: IdentityFederationGateway<SqliteStore>,
    pub assertions: SignedAssertionVerifier,
    pub registry: Arc<SessionRegistry<SqliteStore>>,
    pub connections: Arc<ConnectionManager<SqliteStore>>,
}

impl AppState {
    /// Wire the components over one store
    pub fn new(config: &AppConfig, store: Arc<SqliteStore>) -> Self {
        let credential_config = config.credentials.to_credential_config();
        let log = Arc::new(MessageLog::new(
            store.clone(),
            config.realtime.max_message_bytes,
        ));
        let registry = Arc::new(SessionRegistry::new(store.clone(), log.clone()));
        let connections = Arc::new(ConnectionManager::new(
            registry.clone(),
            log,
            config.realtime.outbound_buffer,
        ));

        Self {
            cookies: TokenCookies::new(config.cookies.clone(), &credential_config),
            credentials: CredentialAuthority::new(credential_config),
            federation: IdentityFederationGateway::new(store.clone()),
            assertions: SignedAssertionVerifier::new(&config.federation),
            registry,
            connections,
            store,
        }
    }

    /// Caller identity from the access token in cookie or header
    pub fn authenticate(&self, jar: &CookieJar, headers: &HeaderMap) -> AuthResult<Identity> {
        let token = cookies::access_token(jar, headers).ok_or(AuthError::MissingCredential)?;
        let claims = self
            .credentials
            .verify(&token, TokenKind::Access)
            .inspect_err(|e| debug!(error = %e, "Access token rejected"))?;
        self.require_active(claims.sub)
    }

    /// Load an identity that may act: it must exist and be active
    pub fn require_active(&self, identity_id: Uuid) -> AuthResult<Identity> {
        let identity = self
            .store
            .find_identity(identity_id)?
            .ok_or(AuthError::UnknownIdentity)?;
        if !identity.is_active {
            return Err(AuthError::InactiveIdentity);
        }
        Ok(identity)
    }
}
