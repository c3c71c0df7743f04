//! otelboot Telemetry Library
//!
//! This crate assembles the observability surface of a request-serving process:
//! a service-identity resource, a process-wide propagation format, a trace
//! instrumentation pipeline and a log enrichment & fan-out pipeline.
//!
//! # Modules
//!
//! - [`config`] - Configuration sources and typed, validated settings
//! - [`models`] - Resource descriptor, activities and log records
//! - [`propagation`] - Propagation format selection (X-Ray, W3C)
//! - [`trace`] - Instrumentation sources and span exporters
//! - [`logs`] - Log enrichment, filtering and sinks
//! - [`bootstrap`] - The ordered startup sequence
//!
//! # Example
//!
//! ```no_run
//! use telemetry::bootstrap::Bootstrap;
//! use telemetry::config::EnvSource;
//!
//! # async fn example() -> telemetry::TelemetryResult<()> {
//! let source = EnvSource::from_env();
//! let mut telemetry = Bootstrap::new(&source)
//!     .with_service_version(env!("CARGO_PKG_VERSION"))
//!     .run()
//!     .await?;
//!
//! let logs = telemetry.register_with_host(|t| t.logs())?;
//! logs.logger("startup").info("ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logs;
pub mod models;
pub mod propagation;
pub mod trace;

pub use bootstrap::{Bootstrap, StartupStep, Telemetry};
pub use error::{ConfigError, DeliveryError, ParseValueError, TelemetryError, TelemetryResult};
pub use logs::{LogPipeline, Logger};
pub use models::{Activity, LogLevel, LogRecord, ResourceDescriptor};
pub use propagation::{Propagation, PropagationFormat, PropagationSelector};
pub use trace::TracePipeline;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use opentelemetry;
pub use opentelemetry_sdk;
