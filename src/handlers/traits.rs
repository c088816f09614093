//! Handler trait definitions

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────
// JobHandler Trait
// ─────────────────────────────────────────────────────────────────

/// Executes one kind of job
///
/// Handlers receive the request's opaque `requestDetails` and either return
/// a result value or fail. They may suspend on I/O for as long as they need;
/// the dispatcher decides how many run at once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job and produce its `results` value
    async fn execute(&self, details: Value) -> Result<Value>;
}

// ─────────────────────────────────────────────────────────────────
// Closure Adapter
// ─────────────────────────────────────────────────────────────────

/// Adapts an async closure into a [`JobHandler`]
pub struct FnHandler<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap `func` so it can be registered as a handler
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    FnHandler {
        func,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, details: Value) -> Result<Value> {
        (self.func)(details).await
    }
}
