//! Observable lifecycle events.
//!
//! Logged as the `event` field of a tracing record. Names are stable
//! and upper-snake so log queries can match on them.

use std::fmt;

/// Observable events in QuickConsult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & Lifecycle
    /// Startup begins
    BootStart,
    /// Configuration loaded and validated
    ConfigLoaded,
    /// Schema applied to the database
    StoreReady,
    /// Listening for requests
    ServerStart,
    /// Shutdown initiated
    ShutdownStart,

    // Identity
    /// First sighting of an external identity
    IdentityCreated,
    /// Existing identity reached through a new provider
    IdentityLinked,
    /// Token pair issued
    CredentialsIssued,
    /// Token pair rotated from a refresh token
    CredentialsRotated,

    // Consultations
    ConsultationCreated,
    ConsultationClosed,

    // Live connections
    ConnectionOpened,
    ConnectionClosed,
    /// Connection rejected at the handshake
    ConnectionRejected,
    /// Live handle removed after a failed delivery
    HandleDropped,

    /// Durable store failed
    StoreFailure,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "QUICKCONSULT_STARTUP_BEGIN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::StoreReady => "STORE_READY",
            Event::ServerStart => "SERVER_START",
            Event::ShutdownStart => "SHUTDOWN_START",

            Event::IdentityCreated => "IDENTITY_CREATED",
            Event::IdentityLinked => "IDENTITY_LINKED",
            Event::CredentialsIssued => "CREDENTIALS_ISSUED",
            Event::CredentialsRotated => "CREDENTIALS_ROTATED",

            Event::ConsultationCreated => "CONSULTATION_CREATED",
            Event::ConsultationClosed => "CONSULTATION_CLOSED",

            Event::ConnectionOpened => "CONNECTION_OPENED",
            Event::ConnectionClosed => "CONNECTION_CLOSED",
            Event::ConnectionRejected => "CONNECTION_REJECTED",
            Event::HandleDropped => "HANDLE_DROPPED",

            Event::StoreFailure => "STORE_FAILURE",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
