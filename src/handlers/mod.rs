//! Job handlers
//!
//! Provides the [`JobHandler`] abstraction, the registry that maps a job's
//! service name to its handler, and the built-in SEO lookup handler.

mod registry;
mod seo;
mod traits;

pub use registry::*;
pub use seo::*;
pub use traits::*;
