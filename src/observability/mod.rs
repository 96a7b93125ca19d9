//! Observability subsystem for QuickConsult
//!
//! Structured logging through `tracing`, with lifecycle events tagged by
//! a stable name.
//!
//! # Usage
//!
//! ```ignore
//! use quickconsult::observability::{init_logging, Event, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default());
//! tracing::info!(event = %Event::ServerStart, port = 8000, "Listening");
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{init_logging, LogFormat, LoggingConfig};
