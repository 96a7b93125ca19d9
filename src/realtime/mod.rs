//! # QuickConsult Real-Time Module
//!
//! Live message delivery for consultations over WebSocket.
//!
//! ## Architecture
//!
//! - **Connection manager**: per-consultation registry of live
//!   connections, persist-then-fan-out send path
//! - **Frames**: the JSON wire format
//! - **Errors**: close codes for connections that cannot continue
//!
//! Delivery is best-effort per connection. The message log is the
//! durable record; a connection that misses a frame recovers it from
//! history.

pub mod connection;
pub mod errors;
pub mod frames;

pub use connection::{Connection, ConnectionGuard, ConnectionManager, DeliveryReport};
pub use errors::{RealtimeError, RealtimeResult};
pub use frames::{InboundFrame, OutboundFrame};
