//! Typed telemetry settings.
//!
//! [`TelemetrySettings::load`] binds every configuration section into the
//! structs below, applies defaults, and validates the result. Any invalid
//! value is a [`ConfigError`] and aborts bootstrap.

use super::binder::Section;
use super::ConfigSource;
use crate::error::{ConfigError, ParseValueError};
use crate::logs::{ActivityTrackingOptions, LevelFilter, OutputTemplate};
use crate::models::resource::DEFAULT_SERVICE_NAME;
use crate::propagation::PropagationFormat;
use crate::trace::ExporterTarget;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Default OTLP exporter timeout in seconds.
pub const DEFAULT_EXPORT_TIMEOUT_SECS: u64 = 10;

/// Default durable-sink batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest batch the cloud log-ingestion API accepts.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// All telemetry settings for one process.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct TelemetrySettings {
    /// `ServiceName`.
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// `ServiceInstanceId`; the host name is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_instance_id: Option<String>,

    /// The `OpenTelemetry` section.
    #[validate(nested)]
    pub exporter: ExporterSettings,

    /// `OpenTelemetry:Propagation`.
    pub propagation: PropagationFormat,

    /// The `AspNetCoreInstrumentation` (or `ServerInstrumentation`) section.
    #[validate(nested)]
    pub server: ServerInstrumentationOptions,

    /// The `HttpClientInstrumentation` section.
    pub http_client: HttpClientInstrumentationOptions,

    /// The `AWSInstrumentation` section.
    pub aws: AwsInstrumentationOptions,

    /// The `Logging` section.
    #[validate(nested)]
    pub logging: LoggingSettings,
}

impl TelemetrySettings {
    /// Binds and validates settings from a configuration source.
    ///
    /// # Errors
    ///
    /// Returns an error if any value cannot be parsed, the collector endpoint
    /// is malformed, a required key is missing, or validation fails.
    ///
    /// # Example
    ///
    /// ```
    /// use telemetry::config::{MapSource, TelemetrySettings};
    ///
    /// let settings = TelemetrySettings::load(&MapSource::new()).unwrap();
    /// assert_eq!(settings.service_name, "otel-test");
    /// assert_eq!(settings.exporter.target.as_str(), "http://localhost:4317");
    /// ```
    pub fn load(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let root = Section::root(source);

        let settings = Self {
            service_name: root.string_or("ServiceName", DEFAULT_SERVICE_NAME),
            service_instance_id: root.get("ServiceInstanceId"),
            exporter: ExporterSettings::bind(&root.section("OpenTelemetry"))?,
            propagation: root
                .section("OpenTelemetry")
                .parse_or("Propagation", PropagationFormat::default())?,
            server: ServerInstrumentationOptions::bind(
                &root.first_present(&["AspNetCoreInstrumentation", "ServerInstrumentation"]),
            )?,
            http_client: HttpClientInstrumentationOptions::bind(
                &root.section("HttpClientInstrumentation"),
            )?,
            aws: AwsInstrumentationOptions::bind(&root.section("AWSInstrumentation"))?,
            logging: LoggingSettings::bind(&root.section("Logging"))?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// The configured sinks, in fan-out order.
    #[must_use]
    pub fn sinks(&self) -> Vec<SinkConfig> {
        let mut sinks = Vec::new();
        if self.logging.console.enabled {
            sinks.push(SinkConfig::Console(self.logging.console.clone()));
        }
        if self.logging.cloudwatch.enabled {
            sinks.push(SinkConfig::CloudWatch(self.logging.cloudwatch.clone()));
        }
        if self.logging.otlp.enabled {
            sinks.push(SinkConfig::Otlp {
                endpoint: self.exporter.target.clone(),
                timeout: self.exporter.timeout(),
            });
        }
        sinks
    }
}

/// Trace exporter settings (`OpenTelemetry` section).
#[derive(Debug, Clone, Serialize, Validate)]
pub struct ExporterSettings {
    /// `CollectorEndpoint`.
    pub target: ExporterTarget,

    /// `SamplingRatio`, applied to root spans; children follow their parent.
    #[validate(range(min = 0.0, max = 1.0, message = "Sampling ratio must be between 0 and 1"))]
    pub sampling_ratio: f64,

    /// `ConsoleExporter`: also write spans to stdout.
    pub console: bool,

    /// `ExportTimeoutSeconds`.
    #[validate(range(min = 1, message = "Export timeout must be at least one second"))]
    pub timeout_seconds: u64,
}

impl ExporterSettings {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        let target = match section.get("CollectorEndpoint") {
            Some(raw) => ExporterTarget::parse(&raw)?,
            None => ExporterTarget::default(),
        };

        let sampling_ratio: f64 = section.parse_or("SamplingRatio", 1.0)?;
        if !sampling_ratio.is_finite() {
            return Err(ConfigError::invalid(
                section.key("SamplingRatio"),
                sampling_ratio.to_string(),
                "must be a finite number",
            ));
        }

        Ok(Self {
            target,
            sampling_ratio,
            console: section.bool_or("ConsoleExporter", false)?,
            timeout_seconds: section
                .parse_or("ExportTimeoutSeconds", DEFAULT_EXPORT_TIMEOUT_SECS)?,
        })
    }

    /// The export timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            target: ExporterTarget::default(),
            sampling_ratio: 1.0,
            console: false,
            timeout_seconds: DEFAULT_EXPORT_TIMEOUT_SECS,
        }
    }
}

/// Inbound-request instrumentation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Validate)]
pub struct ServerInstrumentationOptions {
    /// Record handler errors as span events.
    pub record_exception: bool,

    /// Path prefixes that get no span.
    #[validate(custom(function = "validate_paths"))]
    pub excluded_paths: Vec<String>,

    /// Request headers copied onto the span as `http.request.header.<name>`.
    pub capture_request_headers: Vec<String>,
}

impl ServerInstrumentationOptions {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            record_exception: section.bool_or("RecordException", false)?,
            excluded_paths: section.list("ExcludedPaths"),
            capture_request_headers: section
                .list("CaptureRequestHeaders")
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        })
    }

    /// Whether a request path is excluded from instrumentation.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path == prefix || path.starts_with(&format!("{prefix}/"))
        })
    }
}

fn validate_paths(paths: &[String]) -> Result<(), ValidationError> {
    if paths.iter().all(|p| p.starts_with('/')) {
        Ok(())
    } else {
        let mut error = ValidationError::new("excluded_path");
        error.message = Some("Excluded paths must start with '/'".into());
        Err(error)
    }
}

/// Outgoing HTTP request instrumentation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpClientInstrumentationOptions {
    /// Hosts whose requests get no span.
    pub excluded_hosts: Vec<String>,

    /// Record transport errors as span events.
    pub record_exception: bool,
}

impl HttpClientInstrumentationOptions {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            excluded_hosts: section
                .list("ExcludedHosts")
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            record_exception: section.bool_or("RecordException", false)?,
        })
    }

    /// Whether a host is excluded from instrumentation.
    #[must_use]
    pub fn is_excluded(&self, host: &str) -> bool {
        self.excluded_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}

/// Vendor (AWS) SDK call instrumentation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwsInstrumentationOptions {
    /// Services in scope; `None` means every service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<BTreeSet<String>>,

    /// Suppress client spans for HTTP calls made inside a vendor span.
    pub suppress_downstream_instrumentation: bool,
}

impl AwsInstrumentationOptions {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        let services = section.list("Services");
        Ok(Self {
            services: (!services.is_empty()).then(|| services.into_iter().collect()),
            suppress_downstream_instrumentation: section
                .bool_or("SuppressDownstreamInstrumentation", true)?,
        })
    }

    /// Whether calls to `service` are instrumented. Case-insensitive.
    #[must_use]
    pub fn covers(&self, service: &str) -> bool {
        self.services
            .as_ref()
            .is_none_or(|set| set.iter().any(|s| s.eq_ignore_ascii_case(service)))
    }
}

impl Default for AwsInstrumentationOptions {
    fn default() -> Self {
        Self {
            services: None,
            suppress_downstream_instrumentation: true,
        }
    }
}

/// Log pipeline settings (`Logging` section).
#[derive(Debug, Clone, Default, Serialize, Validate)]
pub struct LoggingSettings {
    /// `LogLevel`: default and per-category minimum levels.
    pub level: LevelFilter,

    /// `ActivityTrackingOptions`.
    pub activity_tracking: ActivityTrackingOptions,

    /// `Console`.
    pub console: ConsoleSinkSettings,

    /// `CloudWatch`.
    #[validate(nested)]
    pub cloudwatch: CloudWatchSinkSettings,

    /// `OpenTelemetry`.
    pub otlp: OtlpLogSettings,
}

impl LoggingSettings {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        let level_section = section.section("LogLevel");
        let level = LevelFilter::from_entries(level_section.children()).map_err(
            |(category, value)| {
                ConfigError::invalid(level_section.key(&category), value, "unknown log level")
            },
        )?;

        let tracking = section.list("ActivityTrackingOptions").join(",");
        let activity_tracking = if tracking.is_empty() {
            ActivityTrackingOptions::default()
        } else {
            tracking.parse().map_err(|e: ParseValueError| {
                let key = section.key("ActivityTrackingOptions");
                ConfigError::invalid(key, tracking.clone(), e.to_string())
            })?
        };

        Ok(Self {
            level,
            activity_tracking,
            console: ConsoleSinkSettings::bind(&section.section("Console"))?,
            cloudwatch: CloudWatchSinkSettings::bind(&section.section("CloudWatch"))?,
            otlp: OtlpLogSettings {
                enabled: section.section("OpenTelemetry").bool_or("Enabled", false)?,
            },
        })
    }
}

/// Console sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleSinkSettings {
    /// `Enabled`.
    pub enabled: bool,

    /// `OutputTemplate`.
    pub output_template: OutputTemplate,
}

impl ConsoleSinkSettings {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: section.bool_or("Enabled", true)?,
            output_template: section.parse_or("OutputTemplate", OutputTemplate::default())?,
        })
    }
}

impl Default for ConsoleSinkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_template: OutputTemplate::default(),
        }
    }
}

/// Durable cloud sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct CloudWatchSinkSettings {
    /// `Enabled`.
    pub enabled: bool,

    /// `LogGroup`; required when enabled.
    pub log_group: String,

    /// `LogStreamPrefix`.
    pub log_stream_prefix: String,

    /// `Region`; the SDK default chain is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// `BatchSize`: events per ingestion request.
    #[validate(range(min = 1, max = 10_000, message = "Batch size must be between 1 and 10000"))]
    pub batch_size: usize,

    /// `FlushIntervalSeconds`.
    #[validate(range(min = 1, message = "Flush interval must be at least one second"))]
    pub flush_interval_seconds: u64,

    /// `QueueCapacity`: records buffered before new ones are dropped.
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub queue_capacity: usize,

    /// `MaxRetries` per batch.
    pub max_retries: u32,

    /// `RetryBackoffMilliseconds`: base delay, doubled per retry.
    pub retry_backoff_ms: u64,
}

impl CloudWatchSinkSettings {
    fn bind(section: &Section<'_>) -> Result<Self, ConfigError> {
        let enabled = section.bool_or("Enabled", false)?;
        let log_group = section.get("LogGroup").unwrap_or_default();
        if enabled && log_group.is_empty() {
            return Err(ConfigError::MissingKey(section.key("LogGroup")));
        }

        let defaults = Self::default();
        Ok(Self {
            enabled,
            log_group,
            log_stream_prefix: section.get("LogStreamPrefix").unwrap_or_default(),
            region: section.get("Region"),
            batch_size: section.parse_or("BatchSize", defaults.batch_size)?,
            flush_interval_seconds: section
                .parse_or("FlushIntervalSeconds", defaults.flush_interval_seconds)?,
            queue_capacity: section.parse_or("QueueCapacity", defaults.queue_capacity)?,
            max_retries: section.parse_or("MaxRetries", defaults.max_retries)?,
            retry_backoff_ms: section
                .parse_or("RetryBackoffMilliseconds", defaults.retry_backoff_ms)?,
        })
    }

    /// Settings for an enabled sink writing to `log_group`.
    #[must_use]
    pub fn for_group(log_group: impl Into<String>) -> Self {
        Self {
            enabled: true,
            log_group: log_group.into(),
            ..Self::default()
        }
    }

    /// The periodic flush interval.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    /// The base retry backoff.
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for CloudWatchSinkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            log_group: String::new(),
            log_stream_prefix: String::new(),
            region: None,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_seconds: 10,
            queue_capacity: 10_000,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// OTLP log sink settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OtlpLogSettings {
    /// `Enabled`.
    pub enabled: bool,
}

/// One configured log sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    /// Formats and writes each record immediately.
    Console(ConsoleSinkSettings),
    /// Batches records into a cloud log group.
    CloudWatch(CloudWatchSinkSettings),
    /// Ships records to the OTLP collector.
    Otlp {
        /// Collector endpoint, shared with the trace exporter.
        endpoint: ExporterTarget,
        /// Export timeout.
        timeout: Duration,
    },
}

impl SinkConfig {
    /// Short sink name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Console(_) => "console",
            Self::CloudWatch(_) => "cloudwatch",
            Self::Otlp { .. } => "otlp",
        }
    }
}
