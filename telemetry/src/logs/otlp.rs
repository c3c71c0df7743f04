//! OTLP log sink.
//!
//! Bridges [`LogRecord`]s into the OpenTelemetry logs SDK, which batches and
//! exports them to the collector. The logger provider gets its resource from
//! the same [`ResourceDescriptor::configure`] hook as the trace pipeline.

use super::sink::LogSink;
use crate::error::{TelemetryError, TelemetryResult};
use crate::models::{LogRecord, ResourceDescriptor};
use crate::trace::ExporterTarget;
use async_trait::async_trait;
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::trace::{SpanId, TraceFlags, TraceId};
use opentelemetry_otlp::{LogExporter as OtlpLogExporter, WithExportConfig};
use opentelemetry_sdk::logs::{LogExporter, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::Resource;
use std::time::{Duration, SystemTime};

/// Ships records to the OTLP collector.
pub struct OtlpLogSink {
    provider: SdkLoggerProvider,
    logger: SdkLogger,
}

impl OtlpLogSink {
    /// Builds a gRPC OTLP exporter for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built.
    pub fn new(
        resource: &ResourceDescriptor,
        endpoint: &ExporterTarget,
        timeout: Duration,
    ) -> TelemetryResult<Self> {
        let exporter = OtlpLogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.as_str())
            .with_timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Exporter(format!("OTLP log exporter: {e}")))?;

        tracing::info!(endpoint = %endpoint, "OTLP log sink configured");
        Ok(Self::with_exporter(resource, exporter))
    }

    /// Uses any log exporter, batched.
    #[must_use]
    pub fn with_exporter<E>(resource: &ResourceDescriptor, exporter: E) -> Self
    where
        E: LogExporter + 'static,
    {
        let provider = SdkLoggerProvider::builder()
            .with_resource(resource.configure(Resource::builder()).build())
            .with_batch_exporter(exporter)
            .build();
        let logger = provider.logger(env!("CARGO_PKG_NAME"));
        Self { provider, logger }
    }

    async fn run_blocking<F>(&self, action: &'static str, f: F) -> TelemetryResult<()>
    where
        F: FnOnce(SdkLoggerProvider) -> opentelemetry_sdk::error::OTelSdkResult + Send + 'static,
    {
        let provider = self.provider.clone();
        let failed = |reason: String| TelemetryError::Sink {
            sink: "otlp".to_string(),
            reason: format!("{action}: {reason}"),
        };

        tokio::task::spawn_blocking(move || f(provider))
            .await
            .map_err(|e| failed(e.to_string()))?
            .map_err(|e| failed(e.to_string()))
    }
}

impl std::fmt::Debug for OtlpLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtlpLogSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl LogSink for OtlpLogSink {
    fn name(&self) -> &str {
        "otlp"
    }

    fn emit(&self, record: &LogRecord) {
        let mut log = self.logger.create_log_record();
        log.set_timestamp(SystemTime::from(record.timestamp));
        log.set_observed_timestamp(SystemTime::now());
        log.set_severity_number(record.level.severity());
        log.set_severity_text(record.level.as_upper_str());
        log.set_target(record.category.clone());
        log.set_body(AnyValue::from(record.message.clone()));

        let correlation = &record.correlation;
        let trace_id = correlation.trace_id.as_deref().and_then(|id| TraceId::from_hex(id).ok());
        let span_id = correlation.span_id.as_deref().and_then(|id| SpanId::from_hex(id).ok());
        if let (Some(trace_id), Some(span_id)) = (trace_id, span_id) {
            let flags = if correlation.sampled {
                TraceFlags::SAMPLED
            } else {
                TraceFlags::default()
            };
            log.set_trace_context(trace_id, span_id, Some(flags));
        }
        if let Some(parent_id) = &correlation.parent_id {
            log.add_attribute("parent_id", parent_id.clone());
        }
        if let Some(exception) = &record.exception {
            log.add_attribute("exception.message", exception.clone());
        }
        for (key, value) in &correlation.baggage {
            log.add_attribute(format!("baggage.{key}"), value.clone());
        }
        for (key, value) in &correlation.tags {
            log.add_attribute(key.clone(), value.clone());
        }

        self.logger.emit(log);
    }

    async fn flush(&self) -> TelemetryResult<()> {
        self.run_blocking("flush", |provider| provider.force_flush())
            .await
    }

    async fn shutdown(&self) -> TelemetryResult<()> {
        self.run_blocking("shutdown", |provider| provider.shutdown())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Correlation, LogLevel};
    use opentelemetry_sdk::logs::InMemoryLogExporter;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_records_are_exported_with_trace_context_and_resource() {
        let exporter = InMemoryLogExporter::default();
        let resource = ResourceDescriptor::new("checkout-api", "1.0.0", "i-1");
        let sink = OtlpLogSink::with_exporter(&resource, exporter.clone());

        let mut record = LogRecord::new(LogLevel::Warn, "checkout::orders", "stock low");
        record.correlation = Correlation {
            trace_id: Some("5759e988bd862e3fe1be46a994272793".into()),
            span_id: Some("53995c3f42cd8ad8".into()),
            sampled: true,
            ..Correlation::default()
        };
        sink.emit(&record);
        sink.flush().await.unwrap();

        let logs = exporter.get_emitted_logs().unwrap();
        assert_eq!(logs.len(), 1);
        let exported = &logs[0];
        assert_eq!(exported.record.body(), Some(&AnyValue::from("stock low".to_string())));
        assert_eq!(
            exported.record.trace_context().map(|cx| cx.trace_id.to_string()),
            Some("5759e988bd862e3fe1be46a994272793".to_string())
        );
        assert_eq!(
            exported
                .resource
                .get(&opentelemetry::Key::new("service.name"))
                .map(|v| v.to_string()),
            Some("checkout-api".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsampled_correlation_is_not_marked_sampled() {
        let exporter = InMemoryLogExporter::default();
        let resource = ResourceDescriptor::new("checkout-api", "1.0.0", "i-1");
        let sink = OtlpLogSink::with_exporter(&resource, exporter.clone());

        let mut record = LogRecord::new(LogLevel::Info, "checkout::orders", "order placed");
        record.correlation = Correlation {
            trace_id: Some("5759e988bd862e3fe1be46a994272793".into()),
            span_id: Some("53995c3f42cd8ad8".into()),
            ..Correlation::default()
        };
        sink.emit(&record);
        sink.flush().await.unwrap();

        let logs = exporter.get_emitted_logs().unwrap();
        let flags = logs[0].record.trace_context().and_then(|cx| cx.trace_flags);
        assert_eq!(flags, Some(TraceFlags::default()));
    }
}
