//! Health check endpoint.
//!
//! Provides a simple health check endpoint for load balancers and monitoring systems.

use crate::state::AppState;
use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (always "healthy" if reachable).
    pub status: &'static str,
    /// Configured service name.
    pub service: String,
    /// Service version.
    pub version: String,
}

/// Creates the health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
///
/// Returns a simple JSON response indicating the service is healthy.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let resource = state.resource();
    Json(HealthResponse {
        status: "healthy",
        service: resource.service_name.clone(),
        version: resource.service_version.clone(),
    })
}
