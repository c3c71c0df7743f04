//! Integration tests for the otelboot host.
//!
//! These tests assemble telemetry the way the binary does, register it with
//! the router, and drive requests through the full middleware stack.

#[path = "integration_tests/common/mod.rs"]
mod common;
#[path = "integration_tests/health_tests.rs"]
mod health_tests;
#[path = "integration_tests/telemetry_tests.rs"]
mod telemetry_tests;
