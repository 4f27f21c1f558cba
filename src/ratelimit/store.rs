//! Counter store trait for abstracting shared and in-process counter state.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by counter store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Unavailable(String),
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),
}

/// Trait for counter store implementations.
///
/// The rate limiter only ever needs two primitives: an atomic increment that
/// creates missing keys at zero, and an idempotent time-to-live assignment.
/// All shared mutable state lives behind this trait, so any number of
/// limiter instances (in one process or many) may use the same store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter at `key`, returning the new value.
    ///
    /// A key that does not exist (or has expired) is created at zero first,
    /// so the first increment of a window observes `1`.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Set the time-to-live of `key`. Calling this more than once with the
    /// same duration is harmless.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
