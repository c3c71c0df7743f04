//! Integration tests for request tracing and log correlation.
//!
//! Tests cover:
//! - One server span per request, attributed to the configured service
//! - Correlated log records written inside a request
//! - Remote parents read with the configured propagation format
//! - The diagnostics endpoint
//! - Process-wide propagation installed once

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use telemetry::config::MapSource;
use telemetry::opentelemetry::trace::SpanKind;
use telemetry::opentelemetry::Key;
use telemetry::propagation::{PropagationFormat, PropagationSelector};
use telemetry::Bootstrap;

use super::common::{get, get_with_headers, test_host};

#[tokio::test]
async fn test_checkout_request_exports_one_span_and_correlated_logs() {
    let host = test_host(&[
        ("ServiceName", "checkout-api"),
        ("OpenTelemetry:CollectorEndpoint", "http://collector:4318"),
    ])
    .await;

    let (status, body) = get(host.router.clone(), "/api/v1/telemetry").await;
    assert_eq!(status, StatusCode::OK);

    let spans = host.spans.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].span_kind, SpanKind::Server);
    assert_eq!(spans[0].name, "GET /api/v1/telemetry");

    let traces = host.telemetry.traces();
    assert_eq!(traces.exporter_target().as_str(), "http://collector:4318");
    assert_eq!(
        traces
            .sdk_resource()
            .get(&Key::new("service.name"))
            .map(|v| v.to_string()),
        Some("checkout-api".to_string())
    );

    let trace_id = spans[0].span_context.trace_id().to_string();
    let span_id = spans[0].span_context.span_id().to_string();
    assert_eq!(body["trace_id"], trace_id.as_str());
    assert_eq!(body["span_id"], span_id.as_str());

    let records = host.logs.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, "api::routes::diagnostics");
    assert_eq!(records[0].correlation.trace_id.as_deref(), Some(trace_id.as_str()));
    assert_eq!(records[0].correlation.span_id.as_deref(), Some(span_id.as_str()));
}

#[tokio::test]
async fn test_diagnostics_report_assembled_pipelines() {
    let host = test_host(&[("ServiceName", "checkout-api")]).await;

    let (status, body) = get(host.router, "/api/v1/telemetry").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"]["service_name"], "checkout-api");
    assert_eq!(body["propagation"], "xray");
    assert_eq!(body["exporter_endpoint"], "http://localhost:4317");
    assert_eq!(
        body["sources"],
        serde_json::json!(["server", "xray-trace-id", "aws", "http-client"])
    );
    assert_eq!(body["sinks"], serde_json::json!(["memory"]));
}

#[tokio::test]
async fn test_remote_xray_parent_is_continued() {
    let host = test_host(&[]).await;
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-amzn-trace-id",
        HeaderValue::from_static(
            "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1",
        ),
    );

    let (_, body) = get_with_headers(host.router, "/api/v1/telemetry", headers).await;

    assert_eq!(body["trace_id"], "5759e988bd862e3fe1be46a994272793");
    let spans = host.spans.get_finished_spans().unwrap();
    assert_eq!(spans[0].parent_span_id.to_string(), "53995c3f42cd8ad8");
}

#[tokio::test]
async fn test_w3c_parent_is_continued_when_configured() {
    let host = test_host(&[("OpenTelemetry:Propagation", "tracecontext")]).await;
    let mut headers = HeaderMap::new();
    headers.insert(
        "traceparent",
        HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
    );

    let (_, body) = get_with_headers(host.router, "/api/v1/telemetry", headers).await;

    assert_eq!(body["propagation"], "tracecontext");
    assert_eq!(body["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");
}

#[tokio::test]
async fn test_log_level_filter_applies_to_request_logs() {
    let host = test_host(&[("Logging:LogLevel:api::routes", "Warning")]).await;

    let (status, _) = get(host.router, "/api/v1/telemetry").await;

    assert_eq!(status, StatusCode::OK);
    assert!(host.logs.is_empty());
}

#[tokio::test]
async fn test_process_selector_installs_once() {
    let source = MapSource::from([("Logging:Console:Enabled", "false")]);

    for _ in 0..2 {
        Bootstrap::new(&source)
            .with_span_exporter(opentelemetry_sdk::trace::InMemorySpanExporter::default())
            .run()
            .await
            .unwrap();
    }

    let selector = PropagationSelector::global();
    assert_eq!(selector.install_count(), 1);
    assert_eq!(
        selector.installed().map(|p| p.format()),
        Some(PropagationFormat::XRay)
    );
}
