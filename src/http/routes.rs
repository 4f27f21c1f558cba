//! Route table and handlers.

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::get,
    Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tracing::warn;

use super::middleware::rate_limit;
use super::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// RFC 3339 time the check ran
    pub timestamp: String,
    /// `"up"` or `"down"`
    pub store_status: String,
    /// Counters that were left without an expiry since startup
    pub expiry_failures: u64,
}

/// Guild status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct GuildStatus {
    pub message: String,
    pub data: String,
}

/// Build the application router with rate limiting applied to every route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/guild-status", get(guild_status))
        .layer(ServiceBuilder::new().layer(middleware::from_fn_with_state(state.clone(), rate_limit)))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_status = match state.limiter.check_store().await {
        Ok(()) => "up",
        Err(e) => {
            warn!(error = %e, "Counter store health check failed");
            "down"
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        store_status: store_status.to_string(),
        expiry_failures: state.limiter.expiry_failures(),
    })
}

async fn guild_status() -> Json<GuildStatus> {
    Json(GuildStatus {
        message: "Guild status endpoint".to_string(),
        data: "Sample data here".to_string(),
    })
}
