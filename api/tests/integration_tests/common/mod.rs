//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality used across all integration tests,
//! including test host setup and HTTP request helpers.

use api::{create_router, AppState};
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use opentelemetry_sdk::trace::InMemorySpanExporter;
use serde_json::Value;
use std::sync::Arc;
use telemetry::config::MapSource;
use telemetry::logs::MemorySink;
use telemetry::propagation::PropagationSelector;
use telemetry::{Bootstrap, Telemetry};

/// A registered host with in-memory span and log capture.
pub struct TestHost {
    /// The router, with tracing middleware installed.
    pub router: Router,
    /// Every exported span.
    pub spans: InMemorySpanExporter,
    /// Every log record.
    pub logs: MemorySink,
    /// The assembled telemetry.
    pub telemetry: Telemetry,
}

/// Boots a host from configuration pairs.
///
/// The console sink is disabled unless the pairs turn it back on; an
/// isolated propagation selector keeps tests independent.
pub async fn test_host(pairs: &[(&str, &str)]) -> TestHost {
    let mut source = MapSource::new().with("Logging:Console:Enabled", "false");
    for (key, value) in pairs {
        source.insert(*key, *value);
    }

    let selector = PropagationSelector::new();
    let spans = InMemorySpanExporter::default();
    let logs = MemorySink::new();

    let mut telemetry = Bootstrap::new(&source)
        .with_selector(&selector)
        .with_span_exporter(spans.clone())
        .with_extra_sink(Arc::new(logs.clone()))
        .run()
        .await
        .unwrap();
    let router = telemetry
        .register_with_host(|t| create_router(AppState::from_telemetry(t)))
        .unwrap();

    TestHost {
        router,
        spans,
        logs,
        telemetry,
    }
}

/// Helper to make a GET request.
///
/// # Arguments
///
/// * `app` - The Axum router to send the request to
/// * `uri` - The URI path to GET from
///
/// # Returns
///
/// A tuple containing the response status code and parsed JSON response body.
pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    get_with_headers(app, uri, HeaderMap::new()).await
}

/// Helper to make a GET request carrying extra headers.
pub async fn get_with_headers(app: Router, uri: &str, headers: HeaderMap) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request.headers_mut().extend(headers);

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}
