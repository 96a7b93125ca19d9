//! # Credential Authority
//!
//! Issues, verifies and rotates the access/refresh token pair.
//!
//! ## Invariants
//! - Stateless: verification needs only configuration and the token
//! - Access and refresh tokens are signed with different secrets and
//!   carry different `type` claims
//! - A refresh token is accepted only by [`CredentialAuthority::rotate`],
//!   an access token only by resource operations
//! - No revocation: a token stays valid until its own expiry, including a
//!   refresh token that has already been rotated

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};
use super::identity::Role;

/// Which half of the pair a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: Uuid,

    /// Role of the subject at issuance
    pub auth_type: Role,

    #[serde(rename = "type")]
    pub kind: TokenKind,

    pub iss: String,

    /// Issued at (Unix epoch seconds)
    pub iat: i64,

    /// Expiration (Unix epoch seconds)
    pub exp: i64,

    /// Unique per token, so two pairs issued in the same second differ
    pub jti: Uuid,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Credential configuration
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// Signs access tokens
    pub secret_key: String,

    /// Signs refresh tokens; must differ from `secret_key`
    pub refresh_secret_key: String,

    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,

    pub issuer: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            secret_key: "CHANGE_THIS_SECRET_IN_PRODUCTION".to_string(),
            refresh_secret_key: "CHANGE_THIS_REFRESH_SECRET_IN_PRODUCTION".to_string(),
            access_token_ttl: Duration::minutes(30),
            refresh_token_ttl: Duration::days(1),
            issuer: "quickconsult".to_string(),
        }
    }
}

/// Signed access/refresh pair
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues and verifies token pairs
pub struct CredentialAuthority {
    config: CredentialConfig,
    access_keys: SigningKeys,
    refresh_keys: SigningKeys,
}

impl CredentialAuthority {
    pub fn new(config: CredentialConfig) -> Self {
        let access_keys = SigningKeys::from_secret(&config.secret_key);
        let refresh_keys = SigningKeys::from_secret(&config.refresh_secret_key);
        Self {
            config,
            access_keys,
            refresh_keys,
        }
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Issue a fresh pair bound to the subject and role
    pub fn issue(&self, subject_id: Uuid, role: Role) -> AuthResult<TokenPair> {
        self.issue_at(subject_id, role, Utc::now())
    }

    /// Issue a pair as if at `issued_at`
    pub fn issue_at(&self, subject_id: Uuid, role: Role, issued_at: DateTime<Utc>) -> AuthResult<TokenPair> {
        let access_expires_at = issued_at + self.config.access_token_ttl;
        let refresh_expires_at = issued_at + self.config.refresh_token_ttl;

        let access_token = self.sign(
            TokenKind::Access,
            subject_id,
            role,
            issued_at,
            access_expires_at,
        )?;
        let refresh_token = self.sign(
            TokenKind::Refresh,
            subject_id,
            role,
            issued_at,
            refresh_expires_at,
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    fn sign(
        &self,
        kind: TokenKind,
        subject_id: Uuid,
        role: Role,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let claims = Claims {
            sub: subject_id,
            auth_type: role,
            kind,
            iss: self.config.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.keys(kind).encoding)
            .map_err(|_| AuthError::TokenGenerationFailed)
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access_keys,
            TokenKind::Refresh => &self.refresh_keys,
        }
    }

    /// Verify a token of the expected kind.
    ///
    /// Checks run in this order: structure, expiry, kind, signature. An
    /// expired token is reported as expired whatever its signature.
    pub fn verify(&self, token: &str, expected: TokenKind) -> AuthResult<Claims> {
        let unverified = Self::peek(token)?;

        if unverified.exp <= Utc::now().timestamp() {
            return Err(AuthError::ExpiredCredential);
        }
        if unverified.kind != expected {
            return Err(AuthError::WrongCredentialKind);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let token_data = decode::<Claims>(token, &self.keys(expected).decoding, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
                _ => AuthError::MalformedCredential,
            })?;

        Ok(token_data.claims)
    }

    /// Decode claims without checking the signature or expiry
    fn peek(token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::MalformedCredential)
    }

    /// Exchange a refresh token for a new pair with the same subject and
    /// role. The presented refresh token is not invalidated.
    pub fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.verify(refresh_token, TokenKind::Refresh)?;
        self.issue(claims.sub, claims.auth_type)
    }
}
