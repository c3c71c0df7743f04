//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers and
//! the request-tracing middleware.

use std::sync::Arc;
use telemetry::logs::LogPipeline;
use telemetry::trace::TracePipeline;
use telemetry::{ResourceDescriptor, Telemetry};

/// Application state shared across all request handlers.
///
/// Holds the pipelines assembled at startup. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The service identity.
    resource: Arc<ResourceDescriptor>,
    /// The trace pipeline.
    traces: Arc<TracePipeline>,
    /// The log pipeline.
    logs: Arc<LogPipeline>,
}

impl AppState {
    /// Creates the state from assembled telemetry.
    #[must_use]
    pub fn from_telemetry(telemetry: &Telemetry) -> Self {
        Self {
            resource: Arc::clone(telemetry.resource()),
            traces: telemetry.traces(),
            logs: telemetry.logs(),
        }
    }

    /// Returns the service identity.
    #[must_use]
    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    /// Returns the trace pipeline.
    #[must_use]
    pub fn traces(&self) -> &TracePipeline {
        &self.traces
    }

    /// Returns the log pipeline.
    #[must_use]
    pub fn logs(&self) -> &Arc<LogPipeline> {
        &self.logs
    }
}
