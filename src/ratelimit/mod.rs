//! Rate limiting logic and counter stores.

mod identity;
mod limiter;
mod memory;
mod redis_store;
mod store;

pub use identity::{ClientIdentity, KEY_PREFIX};
pub use limiter::{Decision, RateLimiter};
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, StoreError};
