//! otelboot Host Server
//!
//! This crate is the request-serving process whose observability the
//! `telemetry` crate assembles. It runs the startup sequence, registers the
//! pipelines as request middleware, and only then binds the listener.
//!
//! # Architecture
//!
//! The server is built on Axum and Tokio, providing:
//! - A tracing middleware that starts one server span per request
//! - A health endpoint
//! - A diagnostics endpoint reporting the assembled telemetry
//!
//! # Example
//!
//! ```no_run
//! use api::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod middleware;
mod routes;
mod state;

pub use config::{Config, DEFAULT_SETTINGS_FILE};
pub use middleware::RequestActivity;
pub use state::AppState;

use anyhow::{Context, Result};
use axum::Router;
use telemetry::Bootstrap;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Runs the otelboot host.
///
/// This function loads the server configuration from environment variables,
/// assembles telemetry and starts listening for incoming connections. It
/// handles graceful shutdown on SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - Telemetry bootstrap fails
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the otelboot host with the provided configuration.
///
/// Telemetry is fully assembled and registered before the listener is bound,
/// so the first accepted request is already traced.
///
/// # Errors
///
/// Returns an error if:
/// - The settings file or telemetry configuration is invalid
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let source = config.config_source()?;

    let mut telemetry = Bootstrap::new(&source)
        .with_service_version(env!("CARGO_PKG_VERSION"))
        .run()
        .await
        .context("Telemetry bootstrap failed")?;
    let app = telemetry.register_with_host(|t| create_router(AppState::from_telemetry(t)))?;

    tracing::info!(
        host = %config.host,
        port = %config.port,
        service = %telemetry.resource().service_name,
        "otelboot host starting"
    );

    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = telemetry.shutdown().await {
        tracing::warn!(error = %e, "Telemetry did not shut down cleanly");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Creates the main application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::telemetry_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::trace_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use telemetry::config::MapSource;
    use telemetry::logs::MemorySink;
    use telemetry::propagation::PropagationSelector;
    use tower::ServiceExt;

    async fn app() -> Router {
        let source = MapSource::from([("Logging:Console:Enabled", "false")]);
        let selector = PropagationSelector::new();
        let mut telemetry = Bootstrap::new(&source)
            .with_selector(&selector)
            .with_span_exporter(InMemorySpanExporter::default())
            .with_extra_sink(std::sync::Arc::new(MemorySink::new()))
            .run()
            .await
            .unwrap();
        telemetry
            .register_with_host(|t| create_router(AppState::from_telemetry(t)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_200() {
        let app = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_json() {
        let app = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok());

        assert!(content_type.is_some_and(|ct| ct.contains("application/json")));
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.settings_file.to_str(), Some("appsettings.json"));
    }

    #[test]
    fn test_config_socket_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ..Config::default()
        };
        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_config_rejects_bad_host() {
        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.socket_addr().is_err());
    }
}
