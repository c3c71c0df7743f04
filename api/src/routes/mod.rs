//! API route definitions.
//!
//! This module organizes all HTTP routes for the otelboot host.

mod diagnostics;
mod health;

pub use diagnostics::telemetry_routes;
pub use health::health_routes;
