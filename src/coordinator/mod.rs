//! Coordinator communication
//!
//! Handles the persistent WebSocket channel to the coordinator:
//! - Authenticated handshake with the stored session token
//! - Inbound job events and outbound responses
//! - Keep-alive pings and graceful close

mod connection;

pub use connection::*;
