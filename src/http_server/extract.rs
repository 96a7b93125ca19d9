//! Request extractors.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;

use super::errors::ApiError;
use super::state::AppState;
use crate::auth::Identity;
use crate::store;

/// The authenticated, active caller
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<Arc<AppState>> for CurrentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let headers = parts.headers.clone();
        let state = Arc::clone(state);
        let identity = store::blocking(move || state.authenticate(&jar, &headers)).await?;
        Ok(CurrentIdentity(identity))
    }
}
