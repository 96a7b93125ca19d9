//! # Consultation Module
//!
//! Two-party consultations and their message history.
//!
//! - **Registry**: creation, membership, close
//! - **Message log**: append-only history per consultation

pub mod errors;
pub mod message_log;
pub mod model;
pub mod registry;

pub use errors::{SessionError, SessionResult};
pub use message_log::MessageLog;
pub use model::{Consultation, ConsultationStatus, ConsultationView, Message, MessageKind};
pub use registry::SessionRegistry;
