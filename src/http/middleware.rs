//! Rate limit middleware.
//!
//! Runs before every handler: derives the caller's identity, asks the
//! limiter for a decision and either short-circuits with `429 Too Many
//! Requests` or forwards the request and reports the remaining quota in
//! the `X-RateLimit-Remaining` response header.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::AppState;
use crate::config::FailurePolicy;

/// Response header carrying the caller's remaining quota.
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Body of a `429` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitExceeded {
    pub error: String,
    /// Human readable wait, e.g. `"60 seconds"`
    pub retry_after: String,
}

/// Body of a response produced when the limiter itself failed.
#[derive(Debug, Serialize, Deserialize)]
pub struct LimiterFailure {
    pub error: String,
}

/// Derive the identity a request is counted against.
///
/// With `trust_forwarded` set, the first `X-Forwarded-For` entry wins, then
/// `X-Real-IP`. Otherwise (or when neither is present) the peer address of
/// the connection is used. Returns an empty string when nothing is known.
pub fn client_identity(request: &Request, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = header_str(request, "x-forwarded-for")
            .and_then(|value| value.split(',').map(str::trim).find(|ip| !ip.is_empty()));
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        if let Some(ip) = header_str(request, "x-real-ip").map(str::trim) {
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Whole seconds a client should wait, rounded up.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let secs = retry_after_secs(retry_after);
    let body = RateLimitExceeded {
        error: "rate limit exceeded".to_string(),
        retry_after: format!("{} seconds", secs),
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, HeaderValue::from(secs))],
        Json(body),
    )
        .into_response()
}

/// Rate limiting middleware for the router.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identity = client_identity(&request, state.trust_forwarded_headers);

    match state.limiter.admit(&identity).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
            response
        }
        Ok(decision) => {
            debug!(identity = %identity, count = decision.count, "Rejecting request");
            too_many_requests(decision.retry_after)
        }
        Err(err) => match state.failure_policy {
            FailurePolicy::Closed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LimiterFailure {
                    error: "rate limiter error".to_string(),
                }),
            )
                .into_response(),
            FailurePolicy::Open => {
                warn!(error = %err, "Rate limiter unavailable, admitting request unchecked");
                next.run(request).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitingConfig;
    use crate::http::router;
    use crate::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter, StoreError};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set_expiry(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn app_with(store: Arc<dyn CounterStore>, config: RateLimitingConfig) -> Router {
        let limiter = Arc::new(RateLimiter::from_config(store, &config));
        router(AppState::new(limiter, &config))
    }

    fn app(limit: u64) -> Router {
        let config = RateLimitingConfig {
            requests_per_window: limit,
            ..RateLimitingConfig::default()
        };
        app_with(Arc::new(MemoryCounterStore::new()), config)
    }

    fn get_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/api/guild-status")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_carries_remaining_header() {
        let app = app(3);

        let response = app.oneshot(get_from("10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REMAINING_HEADER], "2");
    }

    #[tokio::test]
    async fn test_request_over_limit_is_rejected() {
        let app = app(2);

        for expected in ["1", "0"] {
            let response = app.clone().oneshot(get_from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[REMAINING_HEADER], expected);
        }

        let response = app.oneshot(get_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");
        assert!(response.headers().get(REMAINING_HEADER).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: RateLimitExceeded = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "rate limit exceeded");
        assert_eq!(body.retry_after, "60 seconds");
    }

    #[tokio::test]
    async fn test_clients_limited_independently() {
        let app = app(1);

        let first = app.clone().oneshot(get_from("10.0.0.1")).await.unwrap();
        let second = app.clone().oneshot(get_from("10.0.0.1")).await.unwrap();
        let other = app.oneshot(get_from("10.0.0.2")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let app = app_with(Arc::new(DownStore), RateLimitingConfig::default());

        let response = app.oneshot(get_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: LimiterFailure = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "rate limiter error");
    }

    #[tokio::test]
    async fn test_store_outage_fails_open_when_configured() {
        let config = RateLimitingConfig {
            failure_policy: FailurePolicy::Open,
            ..RateLimitingConfig::default()
        };
        let app = app_with(Arc::new(DownStore), config);

        let response = app.oneshot(get_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(REMAINING_HEADER).is_none());
    }

    #[test]
    fn test_identity_from_forwarded_for() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", " 203.0.113.9, 10.0.0.1")
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_identity(&request, true), "203.0.113.9");
    }

    #[test]
    fn test_identity_from_real_ip() {
        let request = axum::http::Request::builder()
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_identity(&request, true), "198.51.100.1");
    }

    #[test]
    fn test_identity_from_peer_address() {
        let mut request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        let peer: SocketAddr = "192.0.2.4:51234".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        // Proxy headers ignored unless trusted
        assert_eq!(client_identity(&request, false), "192.0.2.4");
    }

    #[test]
    fn test_identity_unknown_without_any_source() {
        let request = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_identity(&request, true), "");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
    }
}
