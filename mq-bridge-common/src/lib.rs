//! Common types shared by both sides of the MQ bridge.
//!
//! This crate owns the wire envelope that carries a message body plus an
//! optional metadata header across the boundary between the queueing
//! middleware and the pub/sub bus:
//! - [`BridgeMessage`]: header + opaque body
//! - [`BridgeHeader`]: the subset of middleware metadata that survives the trip
//!
//! It has no knowledge of either backend and performs no I/O.

mod encoding;
pub mod message;

// Re-export commonly used types
pub use message::{BridgeHeader, BridgeMessage, MessageError, WIRE_VERSION};
