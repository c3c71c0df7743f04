//! The ordered startup sequence.
//!
//! [`Bootstrap::run`] performs, in order and exactly once:
//!
//! 1. load and validate configuration,
//! 2. build the [`ResourceDescriptor`],
//! 3. install the process propagation format,
//! 4. build the trace pipeline,
//! 5. build the log pipeline from the configured sink list.
//!
//! The host then calls [`Telemetry::register_with_host`] to wire the
//! pipelines into its request lifecycle before it accepts connections. Any
//! failure aborts startup; nothing is rolled back.

use crate::config::{ConfigSource, SinkConfig, TelemetrySettings};
use crate::error::{TelemetryError, TelemetryResult};
use crate::logs::{
    CloudWatchSink, ConsoleSink, LogIngestionClient, LogPipeline, LogSink, OtlpLogSink,
};
use crate::models::{resource::UNKNOWN, ResourceDescriptor};
use crate::propagation::{Propagation, PropagationSelector};
use crate::trace::{TracePipeline, TracePipelineBuilder};
use chrono::{DateTime, Utc};
use opentelemetry_sdk::trace::SpanExporter;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// One step of the startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStep {
    /// Configuration bound and validated.
    LoadConfiguration,
    /// Service identity built.
    BuildResource,
    /// Propagation format installed.
    InstallPropagation,
    /// Trace pipeline built.
    BuildTracePipeline,
    /// Log pipeline built.
    BuildLogPipeline,
    /// Pipelines wired into the host.
    RegisterWithHost,
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadConfiguration => "load configuration",
            Self::BuildResource => "build resource",
            Self::InstallPropagation => "install propagation",
            Self::BuildTracePipeline => "build trace pipeline",
            Self::BuildLogPipeline => "build log pipeline",
            Self::RegisterWithHost => "register with host",
        };
        f.write_str(name)
    }
}

type TraceHook = Box<dyn FnOnce(TracePipelineBuilder) -> TracePipelineBuilder + Send>;

/// Startup orchestrator.
///
/// The sink list comes from configuration; the `with_*` methods substitute
/// collaborators (exporter transport, ingestion client, console writer) and
/// add sinks without changing the sequence.
pub struct Bootstrap<'a> {
    source: &'a dyn ConfigSource,
    selector: &'a PropagationSelector,
    service_version: Option<String>,
    started_at: DateTime<Utc>,
    trace_hook: Option<TraceHook>,
    log_client: Option<Arc<dyn LogIngestionClient>>,
    console_writer: Option<Box<dyn Write + Send>>,
    extra_sinks: Vec<Arc<dyn LogSink>>,
}

impl<'a> Bootstrap<'a> {
    /// Creates an orchestrator reading `source` and installing propagation
    /// into the process-wide selector.
    #[must_use]
    pub fn new(source: &'a dyn ConfigSource) -> Self {
        Self {
            source,
            selector: PropagationSelector::global(),
            service_version: None,
            started_at: Utc::now(),
            trace_hook: None,
            log_client: None,
            console_writer: None,
            extra_sinks: Vec::new(),
        }
    }

    /// Installs propagation into `selector` instead of the process-wide one.
    #[must_use]
    pub fn with_selector(mut self, selector: &'a PropagationSelector) -> Self {
        self.selector = selector;
        self
    }

    /// The build version reported in the resource.
    #[must_use]
    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// The process start time the durable log-stream name derives from.
    #[must_use]
    pub fn with_start_time(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Exports spans through `exporter` instead of OTLP.
    #[must_use]
    pub fn with_span_exporter<E>(mut self, exporter: E) -> Self
    where
        E: SpanExporter + 'static,
    {
        self.trace_hook = Some(Box::new(move |builder| builder.with_span_exporter(exporter)));
        self
    }

    /// Ships durable logs through `client` instead of the AWS SDK.
    #[must_use]
    pub fn with_log_ingestion_client(mut self, client: Arc<dyn LogIngestionClient>) -> Self {
        self.log_client = Some(client);
        self
    }

    /// Writes console output to `writer` instead of stdout.
    #[must_use]
    pub fn with_console_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.console_writer = Some(writer);
        self
    }

    /// Appends a sink after the configured ones.
    #[must_use]
    pub fn with_extra_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    /// Runs the startup sequence.
    ///
    /// Must be called from within a Tokio runtime: durable sinks start their
    /// delivery tasks here.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error: configuration, propagation
    /// conflict, source attach, exporter or sink construction.
    pub async fn run(mut self) -> TelemetryResult<Telemetry> {
        let mut steps = Vec::with_capacity(6);

        let settings = TelemetrySettings::load(self.source)?;
        complete(&mut steps, StartupStep::LoadConfiguration);

        let resource = Arc::new(ResourceDescriptor::new(
            settings.service_name.clone(),
            self.service_version.take().unwrap_or_else(|| UNKNOWN.to_string()),
            settings.service_instance_id.clone().unwrap_or_default(),
        ));
        tracing::info!(
            service.name = %resource.service_name,
            service.version = %resource.service_version,
            service.instance.id = %resource.service_instance_id,
            "Resource built"
        );
        complete(&mut steps, StartupStep::BuildResource);

        let propagation = self.selector.install(settings.propagation)?;
        complete(&mut steps, StartupStep::InstallPropagation);

        let traces = self.build_traces(&settings, &resource, &propagation)?;
        complete(&mut steps, StartupStep::BuildTracePipeline);

        let logs = self.build_logs(&settings, &resource).await?;
        complete(&mut steps, StartupStep::BuildLogPipeline);

        Ok(Telemetry {
            settings,
            resource,
            propagation,
            traces: Arc::new(traces),
            logs: Arc::new(logs),
            started_at: self.started_at,
            steps,
        })
    }

    fn build_traces(
        &mut self,
        settings: &TelemetrySettings,
        resource: &Arc<ResourceDescriptor>,
        propagation: &Propagation,
    ) -> TelemetryResult<TracePipeline> {
        let mut builder = TracePipeline::builder(Arc::clone(resource), propagation.clone())
            .with_exporter_settings(settings.exporter.clone())
            .add_server_instrumentation(settings.server.clone())
            .add_xray_trace_id()
            .add_aws_instrumentation(settings.aws.clone())
            .add_http_client_instrumentation(settings.http_client.clone());

        if let Some(hook) = self.trace_hook.take() {
            builder = hook(builder);
        }
        builder.build()
    }

    async fn build_logs(
        &mut self,
        settings: &TelemetrySettings,
        resource: &Arc<ResourceDescriptor>,
    ) -> TelemetryResult<LogPipeline> {
        let mut builder = LogPipeline::builder(Arc::clone(resource))
            .with_filter(settings.logging.level.clone())
            .with_activity_tracking(settings.logging.activity_tracking);

        for sink in settings.sinks() {
            builder = builder.with_sink(self.build_sink(sink, resource).await?);
        }
        for sink in self.extra_sinks.drain(..) {
            builder = builder.with_sink(sink);
        }

        let pipeline = builder.build();
        tracing::info!(sinks = ?pipeline.sink_names(), "Log pipeline built");
        Ok(pipeline)
    }

    async fn build_sink(
        &mut self,
        config: SinkConfig,
        resource: &ResourceDescriptor,
    ) -> TelemetryResult<Arc<dyn LogSink>> {
        let sink: Arc<dyn LogSink> = match config {
            SinkConfig::Console(console) => match self.console_writer.take() {
                Some(writer) => Arc::new(ConsoleSink::with_writer(console.output_template, writer)),
                None => Arc::new(ConsoleSink::stdout(console.output_template)),
            },
            SinkConfig::CloudWatch(cloudwatch) => {
                let client = match self.log_client.clone() {
                    Some(client) => client,
                    None => default_ingestion_client(cloudwatch.region.as_deref()).await?,
                };
                Arc::new(CloudWatchSink::start(&cloudwatch, client, self.started_at))
            }
            SinkConfig::Otlp { endpoint, timeout } => {
                Arc::new(OtlpLogSink::new(resource, &endpoint, timeout)?)
            }
        };
        Ok(sink)
    }
}

fn complete(steps: &mut Vec<StartupStep>, step: StartupStep) {
    tracing::debug!(step = %step, "Startup step complete");
    steps.push(step);
}

#[cfg(feature = "cloudwatch")]
async fn default_ingestion_client(
    region: Option<&str>,
) -> TelemetryResult<Arc<dyn LogIngestionClient>> {
    let client = crate::logs::AwsCloudWatchLogsClient::from_env(region).await;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "cloudwatch"))]
async fn default_ingestion_client(
    _region: Option<&str>,
) -> TelemetryResult<Arc<dyn LogIngestionClient>> {
    Err(TelemetryError::Sink {
        sink: "cloudwatch".into(),
        reason: "built without the `cloudwatch` feature and no ingestion client was given".into(),
    })
}

/// The assembled telemetry of one process.
pub struct Telemetry {
    settings: TelemetrySettings,
    resource: Arc<ResourceDescriptor>,
    propagation: Propagation,
    traces: Arc<TracePipeline>,
    logs: Arc<LogPipeline>,
    started_at: DateTime<Utc>,
    steps: Vec<StartupStep>,
}

impl Telemetry {
    /// The validated settings.
    #[must_use]
    pub fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }

    /// The shared service identity.
    #[must_use]
    pub fn resource(&self) -> &Arc<ResourceDescriptor> {
        &self.resource
    }

    /// The installed propagation format.
    #[must_use]
    pub fn propagation(&self) -> &Propagation {
        &self.propagation
    }

    /// The trace pipeline.
    #[must_use]
    pub fn traces(&self) -> Arc<TracePipeline> {
        Arc::clone(&self.traces)
    }

    /// The log pipeline.
    #[must_use]
    pub fn logs(&self) -> Arc<LogPipeline> {
        Arc::clone(&self.logs)
    }

    /// When startup began.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The steps completed so far, in order.
    #[must_use]
    pub fn steps(&self) -> &[StartupStep] {
        &self.steps
    }

    /// Whether [`Telemetry::register_with_host`] has run.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.steps.contains(&StartupStep::RegisterWithHost)
    }

    /// Wires the pipelines into the host, once.
    ///
    /// `register` receives the assembled telemetry and returns whatever the
    /// host needs (typically its router with the tracing middleware). Call
    /// this before the host accepts connections.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::AlreadyRegistered`] on a second call.
    pub fn register_with_host<R>(
        &mut self,
        register: impl FnOnce(&Telemetry) -> R,
    ) -> TelemetryResult<R> {
        if self.is_registered() {
            return Err(TelemetryError::AlreadyRegistered);
        }

        let registered = register(self);
        complete(&mut self.steps, StartupStep::RegisterWithHost);
        tracing::info!(service.name = %self.resource.service_name, "Telemetry registered");
        Ok(registered)
    }

    /// Flushes and stops both pipelines. Both are stopped even if one fails.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Shutdown`] naming every pipeline that failed.
    pub async fn shutdown(&self) -> TelemetryResult<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.traces.shutdown().await {
            failures.push(format!("traces: {e}"));
        }
        if let Err(e) = self.logs.shutdown().await {
            failures.push(format!("logs: {e}"));
        }

        if failures.is_empty() {
            tracing::info!("Telemetry shut down");
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(failures.join("; ")))
        }
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("resource", &self.resource)
            .field("propagation", &self.propagation)
            .field("traces", &self.traces)
            .field("logs", &self.logs)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}
