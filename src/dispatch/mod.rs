//! Job dispatch
//!
//! Handles the path from an inbound job request to its emitted response:
//! - Handler resolution and execution
//! - Bounded queueing with a concurrency limit
//! - Response delivery with an outbox for disconnected periods
//! - Job accounting

mod dispatcher;
mod emitter;
mod tracker;

pub use dispatcher::*;
pub use emitter::*;
pub use tracker::*;
