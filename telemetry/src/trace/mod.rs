//! Trace instrumentation pipeline.
//!
//! The pipeline is an ordered chain of instrumentation sources in front of
//! one tracer provider. The provider carries the shared resource, a
//! parent-based ratio sampler, exactly one durable exporter bound to the
//! configured [`ExporterTarget`], and optionally a stdout exporter for
//! debugging. Export is hand-off only: spans are queued to the exporter and
//! never retried here.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use telemetry::config::ServerInstrumentationOptions;
//! use telemetry::opentelemetry_sdk::trace::InMemorySpanExporter;
//! use telemetry::propagation::{PropagationFormat, PropagationSelector};
//! use telemetry::trace::TracePipeline;
//! use telemetry::ResourceDescriptor;
//!
//! # fn main() -> telemetry::TelemetryResult<()> {
//! let propagation = PropagationSelector::new().install(PropagationFormat::XRay)?;
//! let resource = Arc::new(ResourceDescriptor::new("checkout-api", "1.0.0", "i-1"));
//! let exporter = InMemorySpanExporter::default();
//!
//! let traces = TracePipeline::builder(resource, propagation)
//!     .add_server_instrumentation(ServerInstrumentationOptions::default())
//!     .add_xray_trace_id()
//!     .with_span_exporter(exporter.clone())
//!     .build()?;
//!
//! assert!(traces.server().is_some());
//! # Ok(())
//! # }
//! ```

pub mod exporter;
pub mod sources;

pub use exporter::{ExporterTarget, DEFAULT_COLLECTOR_ENDPOINT};
pub use opentelemetry_aws::trace::XrayIdGenerator;
pub use sources::{AwsInstrumentation, HttpClientInstrumentation, ServerInstrumentation};

use crate::config::{
    AwsInstrumentationOptions, ExporterSettings, HttpClientInstrumentationOptions,
    ServerInstrumentationOptions,
};
use crate::error::{TelemetryError, TelemetryResult};
use crate::models::ResourceDescriptor;
use crate::propagation::Propagation;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{
    Sampler, SdkTracer, SdkTracerProvider, SpanExporter, TracerProviderBuilder,
};
use opentelemetry_sdk::Resource;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Instrumentation scope name for every span the pipeline creates.
const TRACER_NAME: &str = "otelboot";

/// A link in the instrumentation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentationSource {
    /// Inbound server requests.
    Server,
    /// X-Ray format trace-id generation.
    XRayTraceId,
    /// Vendor (AWS) service calls.
    Aws,
    /// Outgoing HTTP requests.
    HttpClient,
}

impl InstrumentationSource {
    /// The source's name in diagnostics and errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::XRayTraceId => "xray-trace-id",
            Self::Aws => "aws",
            Self::HttpClient => "http-client",
        }
    }
}

impl fmt::Display for InstrumentationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for InstrumentationSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

enum SourceConfig {
    Server(ServerInstrumentationOptions),
    XRayTraceId,
    Aws(AwsInstrumentationOptions),
    HttpClient(HttpClientInstrumentationOptions),
}

impl SourceConfig {
    fn kind(&self) -> InstrumentationSource {
        match self {
            Self::Server(_) => InstrumentationSource::Server,
            Self::XRayTraceId => InstrumentationSource::XRayTraceId,
            Self::Aws(_) => InstrumentationSource::Aws,
            Self::HttpClient(_) => InstrumentationSource::HttpClient,
        }
    }
}

type ExporterInstaller = Box<dyn FnOnce(TracerProviderBuilder) -> TracerProviderBuilder + Send>;

/// Builder for [`TracePipeline`].
pub struct TracePipelineBuilder {
    resource: Arc<ResourceDescriptor>,
    propagation: Propagation,
    exporter: ExporterSettings,
    sources: Vec<SourceConfig>,
    span_exporter: Option<ExporterInstaller>,
}

impl TracePipelineBuilder {
    /// Sets the exporter target, sampling ratio, console exporter and timeout.
    #[must_use]
    pub fn with_exporter_settings(mut self, settings: ExporterSettings) -> Self {
        self.exporter = settings;
        self
    }

    /// Appends the inbound-server source.
    #[must_use]
    pub fn add_server_instrumentation(mut self, options: ServerInstrumentationOptions) -> Self {
        self.sources.push(SourceConfig::Server(options));
        self
    }

    /// Appends the X-Ray trace-id adapter.
    #[must_use]
    pub fn add_xray_trace_id(mut self) -> Self {
        self.sources.push(SourceConfig::XRayTraceId);
        self
    }

    /// Appends the vendor (AWS) call source.
    #[must_use]
    pub fn add_aws_instrumentation(mut self, options: AwsInstrumentationOptions) -> Self {
        self.sources.push(SourceConfig::Aws(options));
        self
    }

    /// Appends the outgoing HTTP request source.
    #[must_use]
    pub fn add_http_client_instrumentation(
        mut self,
        options: HttpClientInstrumentationOptions,
    ) -> Self {
        self.sources.push(SourceConfig::HttpClient(options));
        self
    }

    /// Replaces the OTLP transport of the durable exporter.
    ///
    /// Spans are exported synchronously as they end, which is what tests and
    /// local development want. The pipeline still reports the configured
    /// [`ExporterTarget`].
    #[must_use]
    pub fn with_span_exporter<E>(mut self, exporter: E) -> Self
    where
        E: SpanExporter + 'static,
    {
        self.span_exporter = Some(Box::new(move |builder: TracerProviderBuilder| {
            builder.with_simple_exporter(exporter)
        }));
        self
    }

    fn check_sources(&self) -> TelemetryResult<Vec<InstrumentationSource>> {
        let mut attached: Vec<InstrumentationSource> = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let kind = source.kind();
            if attached.contains(&kind) {
                return Err(TelemetryError::Attach {
                    source_name: kind.name(),
                    reason: "attached more than once".into(),
                });
            }
            if let SourceConfig::Aws(options) = source {
                if options.services.as_ref().is_some_and(std::collections::BTreeSet::is_empty) {
                    return Err(TelemetryError::Attach {
                        source_name: kind.name(),
                        reason: "no services in scope".into(),
                    });
                }
            }
            attached.push(kind);
        }
        Ok(attached)
    }

    /// Attaches every source and builds the tracer provider.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Attach`] for a source attached twice or a
    /// vendor source with an empty service set, and
    /// [`TelemetryError::Exporter`] if the OTLP exporter cannot be built.
    pub fn build(self) -> TelemetryResult<TracePipeline> {
        let attached = self.check_sources()?;
        let sdk_resource = self.resource.configure(Resource::builder()).build();

        let mut builder = SdkTracerProvider::builder()
            .with_resource(sdk_resource.clone())
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.exporter.sampling_ratio,
            ))));

        if attached.contains(&InstrumentationSource::XRayTraceId) {
            builder = builder.with_id_generator(XrayIdGenerator::default());
        }

        let target = self.exporter.target.clone();
        builder = match self.span_exporter {
            Some(install) => install(builder),
            None => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(target.as_str())
                    .with_timeout(self.exporter.timeout())
                    .build()
                    .map_err(|e| TelemetryError::Exporter(format!("OTLP span exporter: {e}")))?;
                builder.with_batch_exporter(exporter)
            }
        };

        if self.exporter.console {
            builder = builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default());
        }

        let provider = builder.build();
        let tracer = provider.tracer(TRACER_NAME);

        let mut server = None;
        let mut aws = None;
        let mut http_client = None;
        let suppress_inside_vendor = self.sources.iter().any(|s| {
            matches!(s, SourceConfig::Aws(options) if options.suppress_downstream_instrumentation)
        });
        for source in self.sources {
            match source {
                SourceConfig::Server(options) => {
                    server = Some(ServerInstrumentation::new(
                        tracer.clone(),
                        self.propagation.clone(),
                        options,
                    ));
                }
                SourceConfig::XRayTraceId => {}
                SourceConfig::Aws(options) => {
                    aws = Some(AwsInstrumentation::new(tracer.clone(), options));
                }
                SourceConfig::HttpClient(options) => {
                    http_client = Some(HttpClientInstrumentation::new(
                        tracer.clone(),
                        self.propagation.clone(),
                        options,
                        suppress_inside_vendor,
                    ));
                }
            }
        }

        tracing::info!(
            endpoint = %target,
            sources = ?attached,
            console = self.exporter.console,
            sampling_ratio = self.exporter.sampling_ratio,
            "Trace pipeline built"
        );

        Ok(TracePipeline {
            provider,
            tracer,
            resource: self.resource,
            sdk_resource,
            propagation: self.propagation,
            target,
            console_exporter: self.exporter.console,
            sources: attached,
            server,
            aws,
            http_client,
        })
    }
}

/// The assembled trace pipeline.
pub struct TracePipeline {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
    resource: Arc<ResourceDescriptor>,
    sdk_resource: Resource,
    propagation: Propagation,
    target: ExporterTarget,
    console_exporter: bool,
    sources: Vec<InstrumentationSource>,
    server: Option<ServerInstrumentation>,
    aws: Option<AwsInstrumentation>,
    http_client: Option<HttpClientInstrumentation>,
}

impl TracePipeline {
    /// Starts building a pipeline with default exporter settings and no sources.
    #[must_use]
    pub fn builder(
        resource: Arc<ResourceDescriptor>,
        propagation: Propagation,
    ) -> TracePipelineBuilder {
        TracePipelineBuilder {
            resource,
            propagation,
            exporter: ExporterSettings::default(),
            sources: Vec::new(),
            span_exporter: None,
        }
    }

    /// The service identity.
    #[must_use]
    pub fn resource(&self) -> &Arc<ResourceDescriptor> {
        &self.resource
    }

    /// The OpenTelemetry resource attached to every span.
    #[must_use]
    pub fn sdk_resource(&self) -> &Resource {
        &self.sdk_resource
    }

    /// The installed propagation format.
    #[must_use]
    pub fn propagation(&self) -> &Propagation {
        &self.propagation
    }

    /// Where the durable exporter sends spans.
    #[must_use]
    pub fn exporter_target(&self) -> &ExporterTarget {
        &self.target
    }

    /// Whether spans are also written to stdout.
    #[must_use]
    pub fn has_console_exporter(&self) -> bool {
        self.console_exporter
    }

    /// The attached sources, in chain order.
    #[must_use]
    pub fn sources(&self) -> &[InstrumentationSource] {
        &self.sources
    }

    /// The tracer every source starts spans with.
    #[must_use]
    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    /// The inbound-server source, if attached.
    #[must_use]
    pub fn server(&self) -> Option<&ServerInstrumentation> {
        self.server.as_ref()
    }

    /// The vendor-call source, if attached.
    #[must_use]
    pub fn aws(&self) -> Option<&AwsInstrumentation> {
        self.aws.as_ref()
    }

    /// The outgoing-request source, if attached.
    #[must_use]
    pub fn http_client(&self) -> Option<&HttpClientInstrumentation> {
        self.http_client.as_ref()
    }

    async fn run_blocking<F>(&self, action: &'static str, f: F) -> TelemetryResult<()>
    where
        F: FnOnce(SdkTracerProvider) -> opentelemetry_sdk::error::OTelSdkResult + Send + 'static,
    {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || f(provider))
            .await
            .map_err(|e| TelemetryError::Exporter(format!("{action}: {e}")))?
            .map_err(|e| TelemetryError::Exporter(format!("{action}: {e}")))
    }

    /// Exports every finished span still queued.
    ///
    /// # Errors
    ///
    /// Returns an error if an exporter fails to flush.
    pub async fn force_flush(&self) -> TelemetryResult<()> {
        self.run_blocking("flush", |provider| provider.force_flush())
            .await
    }

    /// Flushes and stops the exporters.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider was already shut down or an exporter
    /// fails to stop.
    pub async fn shutdown(&self) -> TelemetryResult<()> {
        self.run_blocking("shutdown", |provider| provider.shutdown())
            .await
    }
}

impl fmt::Debug for TracePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracePipeline")
            .field("resource", &self.resource)
            .field("propagation", &self.propagation)
            .field("target", &self.target)
            .field("console_exporter", &self.console_exporter)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}
