//! Credential store
//!
//! Persists one login token per identity and selects the most recently
//! issued one when the worker connects.

mod store;

pub use store::*;
