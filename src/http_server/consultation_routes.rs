//! Consultation HTTP Routes
//!
//! Create, list, fetch and close consultations. Every route requires an
//! authenticated caller; fetch and close also require membership.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::auth_routes::StatusResponse;
use super::errors::ApiResult;
use super::extract::CurrentIdentity;
use super::state::AppState;
use crate::consultation::{Consultation, ConsultationView};
use crate::store;

pub fn consultation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_handler))
        .route("/my/active", get(list_active_handler))
        .route("/my/completed", get(list_completed_handler))
        .route("/{id}", get(get_handler))
        .route("/{id}/close", post(close_handler))
}

// ==================
// Request Types
// ==================

#[derive(Debug, Deserialize)]
pub struct CreateConsultationRequest {
    pub expert_id: Uuid,
    pub initial_message: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

// ==================
// Handlers
// ==================

/// The caller opens the consultation as its client
async fn create_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(caller): CurrentIdentity,
    Json(request): Json<CreateConsultationRequest>,
) -> ApiResult<(StatusCode, Json<ConsultationView>)> {
    let view = store::blocking(move || {
        state
            .registry
            .create(caller.id, request.expert_id, &request.initial_message)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_active_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(caller): CurrentIdentity,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Consultation>>> {
    let active = store::blocking(move || state.registry.list_active(caller.id, query.limit)).await?;
    Ok(Json(active))
}

async fn list_completed_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(caller): CurrentIdentity,
) -> ApiResult<Json<Vec<Consultation>>> {
    let completed = store::blocking(move || state.registry.list_completed(caller.id)).await?;
    Ok(Json(completed))
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(caller): CurrentIdentity,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConsultationView>> {
    let view = store::blocking(move || state.registry.get_with_history(id, caller.id)).await?;
    Ok(Json(view))
}

/// Closes through the connection manager so live participants get the
/// closing notice
async fn close_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(caller): CurrentIdentity,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    store::blocking(move || state.connections.close(id, caller.id)).await?;
    Ok(Json(StatusResponse::success()))
}
