//! Authentication against the HTTP user API
//!
//! A successful login yields a bearer token that is persisted in the
//! session store; a failed login leaves the store untouched.

mod client;

pub use client::*;
