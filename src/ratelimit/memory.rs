//! In-process counter store.
//!
//! Suitable for single-instance deployments and tests. Counters are kept in a
//! sharded concurrent map; the per-key entry lock makes each increment atomic
//! with respect to other callers on the same key.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::store::{CounterStore, StoreError};

/// A single counter and its optional expiry deadline.
#[derive(Debug, Default)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// Counter store backed by a concurrent in-process map.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live value of a counter, if any.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.count)
    }

    /// Remaining time-to-live of a counter, if it has one and is still live.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .and_then(|deadline| deadline.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before - self.slots.len()
    }

    /// Number of stored counters, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_default();

        if slot.is_expired(now) {
            trace!(key = %key, "Counter expired, starting fresh");
            *slot = Slot::default();
        }

        slot.count += 1;
        Ok(slot.count)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        // Like Redis, setting a TTL on a missing key is a no-op.
        if let Some(mut slot) = self.slots.get_mut(key) {
            if !slot.is_expired(now) {
                slot.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_creates_counter_at_one() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.increment("k").await.unwrap(), 1);
        assert_eq!(store.increment("k").await.unwrap(), 2);
        assert_eq!(store.count("k"), Some(2));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryCounterStore::new();

        store.increment("a").await.unwrap();
        store.increment("a").await.unwrap();
        store.increment("b").await.unwrap();

        assert_eq!(store.count("a"), Some(2));
        assert_eq!(store.count("b"), Some(1));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_counter_without_ttl_never_expires() {
        let store = MemoryCounterStore::new();
        store.increment("k").await.unwrap();

        assert_eq!(store.ttl("k"), None);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.count("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_expires_after_ttl() {
        let store = MemoryCounterStore::new();
        store.increment("k").await.unwrap();
        store.increment("k").await.unwrap();
        store.set_expiry("k", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.count("k"), Some(2));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.count("k"), None);

        // The next increment starts a fresh counter
        assert_eq!(store.increment("k").await.unwrap(), 1);
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test]
    async fn test_set_expiry_on_missing_key_is_noop() {
        let store = MemoryCounterStore::new();
        store.set_expiry("missing", Duration::from_secs(1)).await.unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        store.increment("short").await.unwrap();
        store.set_expiry("short", Duration::from_secs(1)).await.unwrap();
        store.increment("long").await.unwrap();
        store.set_expiry("long", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count("long"), Some(1));
    }
}
