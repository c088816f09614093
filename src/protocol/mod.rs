//! Protocol module for coordinator communication
//!
//! Defines the event envelope and the job request/response payloads
//! exchanged with the coordinator as JSON text frames over WebSocket.

mod messages;

pub use messages::*;
