//! Auth HTTP Routes
//!
//! Sign-in through a broker assertion, token rotation, logout, and the
//! current session.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::errors::{ApiError, ApiResult};
use super::extract::CurrentIdentity;
use super::state::AppState;
use crate::auth::{cookies, AuthError, Identity, TokenKind, TokenPair};
use crate::observability::Event;
use crate::store;

/// Auth routes with shared state
pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/federate", post(federate_handler))
        .route("/refresh", post(refresh_handler))
        .route("/logout", post(logout_handler))
        .route("/session", get(session_handler))
}

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Deserialize)]
pub struct FederateRequest {
    /// Signed assertion from the OAuth broker
    pub assertion: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub user: Identity,
}

impl AuthResponse {
    fn new(pair: TokenPair, user: Identity) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "bearer",
            user,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self { status: "success" }
    }
}

// ==================
// Handlers
// ==================

async fn federate_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<FederateRequest>,
) -> ApiResult<(CookieJar, Json<AuthResponse>)> {
    let assertion = state.assertions.verify(&request.assertion)?;
    let identity = {
        let state = Arc::clone(&state);
        let assertion = assertion.clone();
        store::blocking(move || state.federation.resolve(&assertion)).await?
    };
    if !identity.is_active {
        return Err(AuthError::InactiveIdentity.into());
    }

    let pair = state.credentials.issue(identity.id, identity.role)?;
    info!(
        event = %Event::CredentialsIssued,
        identity_id = %identity.id,
        provider = %assertion.provider,
        "Signed in"
    );

    let jar = state.cookies.attach(jar, &pair);
    Ok((jar, Json(AuthResponse::new(pair, identity))))
}

/// Refresh token from the cookie, else from a JSON body
async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> ApiResult<(CookieJar, Json<AuthResponse>)> {
    let token = match cookies::refresh_token(&jar) {
        Some(token) => token,
        None if body.is_empty() => return Err(AuthError::MissingCredential.into()),
        None => {
            serde_json::from_slice::<RefreshRequest>(&body)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?
                .refresh_token
        }
    };

    let claims = state.credentials.verify(&token, TokenKind::Refresh)?;
    let identity = {
        let state = Arc::clone(&state);
        store::blocking(move || state.require_active(claims.sub)).await?
    };
    let pair = state.credentials.rotate(&token)?;
    info!(
        event = %Event::CredentialsRotated,
        identity_id = %identity.id,
        "Rotated credentials"
    );

    let jar = state.cookies.attach(jar, &pair);
    Ok((jar, Json(AuthResponse::new(pair, identity))))
}

/// Clears the cookies only; issued tokens stay valid until they expire
async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<StatusResponse>) {
    (state.cookies.clear(jar), Json(StatusResponse::success()))
}

async fn session_handler(CurrentIdentity(identity): CurrentIdentity) -> Json<Identity> {
    Json(identity)
}
