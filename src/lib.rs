//! Atom Worker
//!
//! A remote worker node: it logs in once, keeps the issued token in a local
//! session store, holds a persistent WebSocket connection to the
//! coordinator, runs the service requests it receives through a registry
//! of job handlers, and reports one response per request.

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod version;
pub mod worker;

pub use error::{Error, Result};
pub use worker::Worker;
