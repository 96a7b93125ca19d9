//! # HTTP Server Module
//!
//! REST and WebSocket surface over the consultation core.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/api/v1/auth/*` - Sign-in, rotation, logout, current session
//! - `/api/v1/sessions/*` - Consultations
//! - `/api/v1/sessions/ws/{id}` - Live consultation socket

pub mod auth_routes;
pub mod config;
pub mod consultation_routes;
pub mod errors;
pub mod extract;
pub mod observability_routes;
pub mod realtime_routes;
pub mod server;
pub mod state;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ApiResult, ErrorResponse};
pub use server::{build_router, HttpServer};
pub use state::AppState;
