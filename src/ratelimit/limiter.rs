//! Core rate limiter implementation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use super::identity::ClientIdentity;
use super::store::{CounterStore, StoreError};
use crate::config::RateLimitingConfig;
use crate::error::{Result, RosterError};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window (zero once rejected)
    pub remaining: u64,
    /// How long a rejected caller should wait (zero when allowed)
    pub retry_after: Duration,
    /// Counter value observed by this request
    pub count: u64,
}

impl Decision {
    fn allow(count: u64, remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: Duration::ZERO,
            count,
        }
    }

    fn deny(count: u64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
            count,
        }
    }
}

/// Store access for one window counter: the increment, the expiry of a new
/// window and the timeout bounding each call.
#[derive(Clone)]
struct WindowCounter {
    store: Arc<dyn CounterStore>,
    window: Duration,
    store_timeout: Duration,
    /// Running total of counters left without a time-to-live
    expiry_failures: Arc<AtomicU64>,
}

impl WindowCounter {
    /// Increment `key`, giving it the window's expiry if this opened the
    /// window.
    async fn count(self, key: String) -> std::result::Result<u64, StoreError> {
        let count = self.bounded(self.store.increment(&key)).await?;

        // Only the request that opened the window sets its expiry.
        if count == 1 {
            self.apply_expiry(&key).await;
        }
        Ok(count)
    }

    async fn apply_expiry(&self, key: &str) {
        if let Err(source) = self.bounded(self.store.set_expiry(key, self.window)).await {
            let failures = self.expiry_failures.fetch_add(1, Ordering::Relaxed) + 1;
            let err = RosterError::ExpirySetFailed {
                key: key.to_string(),
                source,
            };
            warn!(
                error = %err,
                expiry_failures = failures,
                "Counter has no expiry and will not reset"
            );
        }
    }

    async fn bounded<T, F>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, op)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(self.store_timeout)))
    }
}

/// Fixed-window request limiter over a shared counter store.
///
/// The limiter holds no counter state of its own; every decision is made from
/// the value returned by the store's atomic increment, so any number of tasks
/// and server instances can share one store without extra locking.
pub struct RateLimiter {
    counter: WindowCounter,
    requests_per_window: u64,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(
        store: Arc<dyn CounterStore>,
        requests_per_window: u64,
        window: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            counter: WindowCounter {
                store,
                window,
                store_timeout,
                expiry_failures: Arc::new(AtomicU64::new(0)),
            },
            requests_per_window,
        }
    }

    /// Create a rate limiter from validated configuration.
    pub fn from_config(store: Arc<dyn CounterStore>, config: &RateLimitingConfig) -> Self {
        Self::new(
            store,
            config.requests_per_window,
            config.window(),
            config.store_timeout(),
        )
    }

    /// Decide whether a request from `identity` may proceed.
    ///
    /// Performs exactly one increment and, for the request that opens a
    /// window, one expiry assignment against the store. A failed increment is
    /// returned as [`RosterError::StoreUnavailable`]; a failed expiry is
    /// logged and counted but does not fail the request.
    ///
    /// The store calls run on their own task. Dropping the returned future
    /// (a disconnected client, say) never leaves a new window without its
    /// expiry; the count is simply not observed.
    pub async fn admit(&self, identity: &str) -> Result<Decision> {
        let identity = ClientIdentity::new(identity);
        let key = identity.counter_key();

        let task = tokio::spawn(self.counter.clone().count(key.clone()));
        let count = match task.await {
            Ok(result) => result,
            Err(e) => Err(StoreError::Unavailable(format!("counter task failed: {}", e))),
        }
        .map_err(|e| {
            error!(key = %key, error = %e, "Failed to increment rate limit counter");
            RosterError::StoreUnavailable(e)
        })?;

        if count > self.requests_per_window {
            debug!(
                identity = %identity,
                count = count,
                limit = self.requests_per_window,
                "Rate limit exceeded"
            );
            return Ok(Decision::deny(count, self.counter.window));
        }

        let remaining = self.requests_per_window - count;
        trace!(identity = %identity, count = count, remaining = remaining, "Request admitted");
        Ok(Decision::allow(count, remaining))
    }

    /// Maximum requests per identity per window.
    pub fn requests_per_window(&self) -> u64 {
        self.requests_per_window
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        self.counter.window
    }

    /// Number of counters whose expiry could not be set since startup.
    pub fn expiry_failures(&self) -> u64 {
        self.counter.expiry_failures.load(Ordering::Relaxed)
    }

    /// Check that the counter store answers within the store timeout.
    pub async fn check_store(&self) -> std::result::Result<(), StoreError> {
        self.counter.bounded(self.counter.store.ping()).await
    }
}
