//! # HTTP Server
//!
//! Main HTTP server combining the endpoint routers.
//!
//! ```text
//! /health
//! /api/v1/auth/{federate,refresh,logout,session}
//! /api/v1/sessions/...
//! /api/v1/sessions/ws/{id}
//! ```

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::auth_routes::auth_routes;
use super::config::HttpServerConfig;
use super::consultation_routes::consultation_routes;
use super::observability_routes::health_routes;
use super::realtime_routes::realtime_routes;
use super::state::AppState;
use crate::observability::Event;

/// Build the combined router with all endpoints
pub fn build_router(state: Arc<AppState>, config: &HttpServerConfig) -> Router {
    let api = Router::new()
        .nest("/auth", auth_routes())
        .nest("/sessions", consultation_routes().merge(realtime_routes()));

    let router = Router::new()
        .merge(health_routes())
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors_layer(config) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Cookies travel cross-origin, so origins are listed explicitly
fn cors_layer(config: &HttpServerConfig) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|s| match s.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!(origin = %s, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true),
    )
}

/// HTTP server for the consultation API
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, state: Arc<AppState>) -> Self {
        let router = build_router(state, &config);
        Self { config, router }
    }

    /// Address the server binds
    pub fn bind_addr(&self) -> String {
        self.config.bind_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until Ctrl-C
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(event = %Event::ServerStart, addr = %addr, "Listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!(event = %Event::ShutdownStart, "Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
