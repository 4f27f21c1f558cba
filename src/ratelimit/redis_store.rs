//! Redis-backed counter store.
//!
//! Counters are plain Redis integers. `INCR` gives the atomic increment
//! (Redis creates missing keys at zero) and `PEXPIRE` the time-to-live, so
//! every server instance pointed at the same Redis shares one set of windows.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, RedisError};
use async_trait::async_trait;
use tracing::{debug, info};

use super::store::{CounterStore, StoreError};
use crate::config::RedisConfig;
use crate::error::{Result, RosterError};

/// Counter store backed by a shared Redis instance.
///
/// The connection manager multiplexes all callers over one connection and
/// reconnects transparently, so the store can be cloned freely.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis and verify the connection with a `PING`.
    ///
    /// Fails if the server cannot be reached within the configured connect
    /// timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.connection_info()?)
            .map_err(|e| RosterError::Config(format!("Invalid Redis address {}: {}", config.addr, e)))?;

        let timeout = config.connect_timeout();
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(unavailable)?;

        let store = Self { conn };
        tokio::time::timeout(timeout, store.ping())
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        info!(addr = %config.addr, db = config.db, "Connected to Redis");
        Ok(store)
    }
}

fn unavailable(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> std::result::Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(unavailable)?;

        u64::try_from(count).map_err(|_| {
            StoreError::Unavailable(format!("counter {} holds negative value {}", key, count))
        })
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> std::result::Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let applied: bool = conn.pexpire(key, millis).await.map_err(unavailable)?;

        if !applied {
            debug!(key = %key, "PEXPIRE found no key to expire");
        }
        Ok(())
    }

    async fn ping(&self) -> std::result::Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
