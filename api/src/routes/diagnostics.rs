//! Telemetry diagnostics endpoint.
//!
//! Reports what was assembled at startup and how the current request is
//! being traced.

use crate::middleware::RequestActivity;
use crate::state::AppState;
use axum::extract::State;
use axum::{routing::get, Extension, Json, Router};
use serde::Serialize;
use telemetry::trace::InstrumentationSource;
use telemetry::ResourceDescriptor;

/// Diagnostics response.
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    /// The service identity.
    pub resource: ResourceDescriptor,
    /// The installed propagation format.
    pub propagation: String,
    /// Where spans are exported.
    pub exporter_endpoint: String,
    /// The attached instrumentation sources, in order.
    pub sources: Vec<InstrumentationSource>,
    /// The log sinks, in fan-out order.
    pub sinks: Vec<String>,
    /// This request's trace id, if traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// This request's span id, if traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// Creates the telemetry diagnostics routes.
pub fn telemetry_routes() -> Router<AppState> {
    Router::new().route("/api/v1/telemetry", get(telemetry_info))
}

async fn telemetry_info(
    State(state): State<AppState>,
    Extension(request): Extension<RequestActivity>,
) -> Json<TelemetryResponse> {
    let activity = request.activity();
    state
        .logs()
        .logger("api::routes::diagnostics")
        .with_activity(activity)
        .info("Telemetry diagnostics requested");

    let traces = state.traces();
    Json(TelemetryResponse {
        resource: state.resource().clone(),
        propagation: traces.propagation().format().to_string(),
        exporter_endpoint: traces.exporter_target().to_string(),
        sources: traces.sources().to_vec(),
        sinks: state.logs().sink_names(),
        trace_id: activity.map(|a| a.trace_id().to_string()),
        span_id: activity.map(|a| a.span_id().to_string()),
    })
}
