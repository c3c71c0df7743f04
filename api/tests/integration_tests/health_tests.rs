//! Integration tests for the health endpoint.

use axum::http::StatusCode;

use super::common::{get, test_host};

#[tokio::test]
async fn test_health_check() {
    let host = test_host(&[("ServiceName", "checkout-api")]).await;

    let (status, response) = get(host.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "healthy");
    assert_eq!(response["service"], "checkout-api");
}

#[tokio::test]
async fn test_health_check_is_traced_unless_excluded() {
    let host = test_host(&[("AspNetCoreInstrumentation:ExcludedPaths:0", "/health")]).await;

    let (status, _) = get(host.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(host.spans.get_finished_spans().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_route_gets_a_span() {
    let host = test_host(&[]).await;

    let (status, _) = get(host.router, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let spans = host.spans.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "GET /missing");
}
