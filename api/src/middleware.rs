//! Request tracing middleware.
//!
//! Starts one server span per inbound request through the trace pipeline's
//! server source and hands the resulting activity to the handler as a
//! request extension. Handlers pass it on to loggers and outgoing calls.

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use telemetry::Activity;

/// The activity of the current request, `None` for excluded paths.
#[derive(Debug, Clone, Default)]
pub struct RequestActivity(pub Option<Activity>);

impl RequestActivity {
    /// The activity, if the request is traced.
    #[must_use]
    pub fn activity(&self) -> Option<&Activity> {
        self.0.as_ref()
    }
}

/// Traces one request.
pub async fn trace_requests(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(server) = state.traces().server() else {
        request.extensions_mut().insert(RequestActivity::default());
        return next.run(request).await;
    };

    let activity = server.start(request.method(), request.uri().path(), request.headers());
    request
        .extensions_mut()
        .insert(RequestActivity(activity.clone()));

    let response = next.run(request).await;

    if let Some(activity) = &activity {
        server.finish(activity, response.status().as_u16(), None);
    }
    response
}
