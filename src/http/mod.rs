//! HTTP request pipeline for the guild roster API.

mod middleware;
mod routes;
mod server;

pub use middleware::{client_identity, rate_limit, REMAINING_HEADER};
pub use routes::router;
pub use server::HttpServer;

use std::sync::Arc;

use crate::config::{FailurePolicy, RateLimitingConfig};
use crate::ratelimit::RateLimiter;

/// State shared by every handler and the rate limit middleware.
#[derive(Clone)]
pub struct AppState {
    /// The rate limiter instance
    pub limiter: Arc<RateLimiter>,
    /// What to do with requests while the counter store is down
    pub failure_policy: FailurePolicy,
    /// Whether proxy headers may name the client
    pub trust_forwarded_headers: bool,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, config: &RateLimitingConfig) -> Self {
        Self {
            limiter,
            failure_policy: config.failure_policy,
            trust_forwarded_headers: config.trust_forwarded_headers,
        }
    }
}
