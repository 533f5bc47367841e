//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Per-endpoint health summary
#[derive(Debug, Serialize)]
pub struct EndpointHealthReport {
    pub name: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (e.g., "ok", "degraded")
    pub status: String,
    /// Module name ("pvlit-wf")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Classification endpoint pool health
    pub endpoints: Vec<EndpointHealthReport>,
}

/// GET /health
///
/// Reports "degraded" when every classification endpoint is unhealthy;
/// allocation still works in that state, only ingestion suffers.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let endpoints: Vec<EndpointHealthReport> = state
        .endpoint_pool
        .snapshot()
        .into_iter()
        .map(|s| EndpointHealthReport {
            name: s.name,
            healthy: s.healthy,
            consecutive_failures: s.consecutive_failures,
            success_count: s.success_count,
            failure_count: s.failure_count,
        })
        .collect();

    let status = if !endpoints.is_empty() && endpoints.iter().all(|e| !e.healthy) {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "pvlit-wf".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        endpoints,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
