//! quickconsult - realtime client/expert consultations
//!
//! Identity federation, signed credentials, consultation lifecycle, and
//! ordered live fan-out over WebSocket, backed by SQLite.

pub mod auth;
pub mod cli;
pub mod config;
pub mod consultation;
pub mod crash_point;
pub mod http_server;
pub mod observability;
pub mod realtime;
pub mod store;
