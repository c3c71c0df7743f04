//! Log enrichment and fan-out.
//!
//! Every record passes through one [`LogPipeline`]: it is filtered by
//! category and level, enriched with the correlation fields of the activity
//! it was logged under, and handed to each sink in turn. Hand-off is
//! synchronous; network sinks deliver from their own background tasks, so a
//! slow or failing sink never holds up the caller or the other sinks.

pub mod cloudwatch;
pub mod console;
pub mod enrich;
pub mod filter;
pub mod memory;
pub mod otlp;
pub mod sink;

#[cfg(feature = "cloudwatch")]
pub use cloudwatch::AwsCloudWatchLogsClient;
pub use cloudwatch::{CloudWatchSink, IngestEvent, LogIngestionClient, SinkStatsSnapshot};
pub use console::{ConsoleSink, OutputTemplate, TemplateError};
pub use enrich::ActivityTrackingOptions;
pub use filter::LevelFilter;
pub use memory::MemorySink;
pub use otlp::OtlpLogSink;
pub use sink::LogSink;

use crate::error::TelemetryResult;
use crate::models::{Activity, LogLevel, LogRecord, ResourceDescriptor};
use std::sync::Arc;

/// The assembled log pipeline.
pub struct LogPipeline {
    resource: Arc<ResourceDescriptor>,
    filter: LevelFilter,
    tracking: ActivityTrackingOptions,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl LogPipeline {
    /// Starts building a pipeline for a service.
    #[must_use]
    pub fn builder(resource: Arc<ResourceDescriptor>) -> LogPipelineBuilder {
        LogPipelineBuilder {
            resource,
            filter: LevelFilter::default(),
            tracking: ActivityTrackingOptions::default(),
            sinks: Vec::new(),
        }
    }

    /// The service identity attached to this pipeline.
    #[must_use]
    pub fn resource(&self) -> &Arc<ResourceDescriptor> {
        &self.resource
    }

    /// Names of the attached sinks, in fan-out order.
    #[must_use]
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// The correlation fields copied onto records.
    #[must_use]
    pub fn activity_tracking(&self) -> ActivityTrackingOptions {
        self.tracking
    }

    /// Whether a record at `level` in `category` would be kept.
    #[must_use]
    pub fn enabled(&self, category: &str, level: LogLevel) -> bool {
        self.filter.enabled(category, level)
    }

    /// Enriches a record from `activity` and hands it to every sink.
    ///
    /// Records below the category's minimum level are discarded.
    pub fn log(&self, activity: Option<&Activity>, mut record: LogRecord) {
        if !self.enabled(&record.category, record.level) {
            return;
        }

        record.correlation = enrich::correlate(activity, self.tracking);
        for sink in &self.sinks {
            sink.emit(&record);
        }
    }

    /// A logger for one category.
    #[must_use]
    pub fn logger(self: &Arc<Self>, category: impl Into<String>) -> Logger {
        Logger {
            pipeline: Arc::clone(self),
            category: category.into(),
            activity: None,
        }
    }

    /// Flushes every sink. All sinks are flushed even if one fails; the first
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first sink error encountered.
    pub async fn flush(&self) -> TelemetryResult<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush().await {
                tracing::warn!(sink = sink.name(), error = %e, "Log sink flush failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Flushes and stops every sink.
    ///
    /// # Errors
    ///
    /// Returns the first sink error encountered.
    pub async fn shutdown(&self) -> TelemetryResult<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.shutdown().await {
                tracing::warn!(sink = sink.name(), error = %e, "Log sink shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPipeline")
            .field("resource", &self.resource)
            .field("filter", &self.filter)
            .field("tracking", &self.tracking)
            .field("sinks", &self.sink_names())
            .finish()
    }
}

/// Builder for [`LogPipeline`].
pub struct LogPipelineBuilder {
    resource: Arc<ResourceDescriptor>,
    filter: LevelFilter,
    tracking: ActivityTrackingOptions,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl LogPipelineBuilder {
    /// Sets the level filter.
    #[must_use]
    pub fn with_filter(mut self, filter: LevelFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets which correlation fields are copied.
    #[must_use]
    pub fn with_activity_tracking(mut self, tracking: ActivityTrackingOptions) -> Self {
        self.tracking = tracking;
        self
    }

    /// Appends a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Finishes the pipeline.
    #[must_use]
    pub fn build(self) -> LogPipeline {
        LogPipeline {
            resource: self.resource,
            filter: self.filter,
            tracking: self.tracking,
            sinks: self.sinks,
        }
    }
}

/// Writes records for one category, optionally bound to an activity.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use telemetry::logs::{LogPipeline, MemorySink};
/// use telemetry::ResourceDescriptor;
///
/// let memory = MemorySink::new();
/// let pipeline = Arc::new(
///     LogPipeline::builder(Arc::new(ResourceDescriptor::new("billing", "1.0.0", "i-1")))
///         .with_sink(Arc::new(memory.clone()))
///         .build(),
/// );
///
/// pipeline.logger("billing::invoices").info("invoice sent");
///
/// let records = memory.records();
/// assert_eq!(records[0].message, "invoice sent");
/// assert!(records[0].correlation.trace_id.is_none());
/// ```
#[derive(Clone)]
pub struct Logger {
    pipeline: Arc<LogPipeline>,
    category: String,
    activity: Option<Activity>,
}

impl Logger {
    /// The same logger, correlated with `activity`.
    #[must_use]
    pub fn with_activity(&self, activity: Option<&Activity>) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            category: self.category.clone(),
            activity: activity.cloned(),
        }
    }

    /// The logger category.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Logs a message at `level`.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if self.pipeline.enabled(&self.category, level) {
            let record = LogRecord::new(level, self.category.clone(), message);
            self.pipeline.log(self.activity.as_ref(), record);
        }
    }

    /// Logs a message with error details.
    pub fn log_exception(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        exception: &dyn std::fmt::Display,
    ) {
        if self.pipeline.enabled(&self.category, level) {
            let record = LogRecord::new(level, self.category.clone(), message)
                .with_exception(exception.to_string());
            self.pipeline.log(self.activity.as_ref(), record);
        }
    }

    /// Logs at trace level.
    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message);
    }

    /// Logs at debug level.
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    /// Logs at info level.
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Logs at warn level.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    /// Logs at error level.
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Logs at fatal level.
    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message);
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .field("activity", &self.activity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::console::tests::SharedBuffer;
    use super::*;
    use crate::config::CloudWatchSinkSettings;
    use crate::error::DeliveryError;
    use crate::models::ActivitySource;
    use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
    use opentelemetry::Context;
    use opentelemetry_sdk::trace::SdkTracerProvider;

    /// An ingestion endpoint that is never reachable.
    struct FailingClient;

    #[async_trait::async_trait]
    impl LogIngestionClient for FailingClient {
        async fn create_log_stream(&self, _: &str, stream: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::CreateStream {
                stream: stream.to_string(),
                reason: "connection refused".into(),
            })
        }

        async fn put_log_events(
            &self,
            _: &str,
            _: &str,
            events: &[IngestEvent],
        ) -> Result<(), DeliveryError> {
            Err(DeliveryError::PutEvents {
                count: events.len(),
                reason: "connection refused".into(),
            })
        }
    }

    fn resource() -> Arc<ResourceDescriptor> {
        Arc::new(ResourceDescriptor::new("checkout-api", "1.0.0", "i-1"))
    }

    fn activity(provider: &SdkTracerProvider) -> Activity {
        let span = provider.tracer("logs-tests").start("GET /orders");
        Activity::new("GET /orders", ActivitySource::Server, Context::new().with_span(span), None)
    }

    #[test]
    fn test_records_under_activity_carry_its_ids() {
        let provider = SdkTracerProvider::builder().build();
        let memory = MemorySink::new();
        let pipeline = Arc::new(
            LogPipeline::builder(resource())
                .with_sink(Arc::new(memory.clone()))
                .build(),
        );
        let activity = activity(&provider);

        let logger = pipeline.logger("checkout::orders");
        logger.with_activity(Some(&activity)).info("inside request");
        logger.info("outside request");

        let records = memory.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].correlation.trace_id, Some(activity.trace_id().to_string()));
        assert_eq!(records[0].correlation.span_id, Some(activity.span_id().to_string()));
        assert!(records[1].correlation.is_empty());
    }

    #[test]
    fn test_filtered_records_reach_no_sink() {
        let memory = MemorySink::new();
        let pipeline = Arc::new(
            LogPipeline::builder(resource())
                .with_filter(
                    LevelFilter::new(Some(LogLevel::Warn))
                        .with_category("audit", Some(LogLevel::Debug)),
                )
                .with_sink(Arc::new(memory.clone()))
                .build(),
        );

        pipeline.logger("app").info("dropped");
        pipeline.logger("app").warn("kept");
        pipeline.logger("audit::trail").debug("kept too");

        let messages: Vec<_> = memory.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["kept", "kept too"]);
    }

    #[test]
    fn test_tracking_options_apply_to_every_sink() {
        let provider = SdkTracerProvider::builder().build();
        let first = MemorySink::new();
        let second = MemorySink::new();
        let pipeline = Arc::new(
            LogPipeline::builder(resource())
                .with_activity_tracking(ActivityTrackingOptions::TRACE_ID)
                .with_sink(Arc::new(first.clone()))
                .with_sink(Arc::new(second.clone()))
                .build(),
        );

        pipeline
            .logger("app")
            .with_activity(Some(&activity(&provider)))
            .error("boom");

        for sink in [first, second] {
            let record = &sink.records()[0];
            assert!(record.correlation.trace_id.is_some());
            assert!(record.correlation.span_id.is_none());
        }
    }

    #[tokio::test]
    async fn test_durable_sink_failure_does_not_block_console() {
        let buffer = SharedBuffer::default();
        let console = ConsoleSink::with_writer(
            "{Level:u3} {Message}{NewLine}".parse().unwrap(),
            Box::new(buffer.clone()),
        );
        let durable = CloudWatchSink::start(
            &CloudWatchSinkSettings {
                max_retries: 1,
                retry_backoff_ms: 0,
                ..CloudWatchSinkSettings::for_group("/app/checkout")
            },
            Arc::new(FailingClient),
            chrono::Utc::now(),
        );
        let durable = Arc::new(durable);
        let pipeline = Arc::new(
            LogPipeline::builder(resource())
                .with_sink(durable.clone())
                .with_sink(Arc::new(console))
                .build(),
        );

        pipeline.logger("app").error("payment failed");
        assert_eq!(buffer.contents(), "ERR payment failed\n");

        pipeline.flush().await.unwrap();
        assert_eq!(durable.stats().failed_batches, 1);
        assert_eq!(pipeline.sink_names(), vec!["cloudwatch", "console"]);
    }

    #[tokio::test]
    async fn test_shutdown_reaches_every_sink() {
        let durable = Arc::new(CloudWatchSink::start(
            &CloudWatchSinkSettings::for_group("/app"),
            Arc::new(FailingClient),
            chrono::Utc::now(),
        ));
        let pipeline = LogPipeline::builder(resource())
            .with_sink(Arc::new(MemorySink::new()))
            .with_sink(durable.clone())
            .build();

        pipeline.shutdown().await.unwrap();
        assert!(durable.flush().await.is_err());
    }
}
