//! Span-producing instrumentation sources.
//!
//! Each source decides on its own whether an operation gets a span; none of
//! them waits on another. The activity they return is the explicit context
//! for the rest of the operation: pass it to child sources and to the log
//! pipeline, then finish it when the operation completes.

use crate::config::{
    AwsInstrumentationOptions, HttpClientInstrumentationOptions, ServerInstrumentationOptions,
};
use crate::models::{Activity, ActivitySource, ActivityStatus};
use crate::propagation::Propagation;
use http::{HeaderMap, Method};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;
use opentelemetry_semantic_conventions::trace::{
    EXCEPTION_MESSAGE, HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, SERVER_ADDRESS, URL_FULL,
    URL_PATH,
};
use std::fmt::Display;

const CAPTURED_HEADER_PREFIX: &str = "http.request.header.";
const AWS_RPC_SYSTEM: &str = "aws-api";

fn record_outcome(
    activity: &Activity,
    status_code: Option<u16>,
    error_from: u16,
    error: Option<&dyn Display>,
    record_exception: bool,
) {
    let span = activity.context().span();
    if let Some(code) = status_code {
        span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(code)));
    }

    match (error, status_code) {
        (Some(error), _) => {
            if record_exception {
                span.add_event(
                    "exception",
                    vec![KeyValue::new(EXCEPTION_MESSAGE, error.to_string())],
                );
            }
            activity.set_status(ActivityStatus::Error(error.to_string()));
        }
        (None, Some(code)) if code >= error_from => {
            activity.set_status(ActivityStatus::Error(format!("HTTP {code}")));
        }
        _ => {}
    }

    activity.end();
}

/// One server span per inbound request.
#[derive(Clone)]
pub struct ServerInstrumentation {
    tracer: SdkTracer,
    propagation: Propagation,
    options: ServerInstrumentationOptions,
}

impl ServerInstrumentation {
    pub(crate) fn new(
        tracer: SdkTracer,
        propagation: Propagation,
        options: ServerInstrumentationOptions,
    ) -> Self {
        Self {
            tracer,
            propagation,
            options,
        }
    }

    /// The bound options.
    #[must_use]
    pub fn options(&self) -> &ServerInstrumentationOptions {
        &self.options
    }

    /// Starts the span for an inbound request.
    ///
    /// The remote parent and baggage are read from `headers` with the
    /// installed propagation format. Returns `None` for excluded paths.
    #[must_use]
    pub fn start(&self, method: &Method, path: &str, headers: &HeaderMap) -> Option<Activity> {
        if self.options.is_excluded(path) {
            tracing::trace!(path, "Path excluded from server instrumentation");
            return None;
        }

        let parent_cx = self.propagation.extract(headers);
        let remote = parent_cx.span().span_context().clone();
        let parent_id = remote.is_valid().then(|| remote.span_id());

        let name = format!("{method} {path}");
        let span = self
            .tracer
            .span_builder(name.clone())
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new(HTTP_REQUEST_METHOD, method.to_string()),
                KeyValue::new(URL_PATH, path.to_string()),
            ])
            .start_with_context(&self.tracer, &parent_cx);

        let activity = Activity::new(
            name,
            ActivitySource::Server,
            parent_cx.with_span(span),
            parent_id,
        );
        for header in &self.options.capture_request_headers {
            if let Some(value) = headers.get(header.as_str()).and_then(|v| v.to_str().ok()) {
                activity.set_tag(format!("{CAPTURED_HEADER_PREFIX}{header}"), value);
            }
        }

        Some(activity)
    }

    /// Records the response and ends the span.
    ///
    /// 5xx responses and handler errors mark the span as failed; the error
    /// itself is recorded as an event only when `RecordException` is set.
    pub fn finish(&self, activity: &Activity, status: u16, error: Option<&dyn Display>) {
        record_outcome(activity, Some(status), 500, error, self.options.record_exception);
    }
}

/// One client span per call into an in-scope vendor (AWS) service.
#[derive(Clone)]
pub struct AwsInstrumentation {
    tracer: SdkTracer,
    options: AwsInstrumentationOptions,
}

impl AwsInstrumentation {
    pub(crate) fn new(tracer: SdkTracer, options: AwsInstrumentationOptions) -> Self {
        Self { tracer, options }
    }

    /// The bound options.
    #[must_use]
    pub fn options(&self) -> &AwsInstrumentationOptions {
        &self.options
    }

    /// Starts the span for a service call, e.g. `("DynamoDB", "GetItem")`.
    ///
    /// Returns `None` when the service is out of scope.
    #[must_use]
    pub fn start_call(
        &self,
        parent: Option<&Activity>,
        service: &str,
        operation: &str,
    ) -> Option<Activity> {
        if !self.options.covers(service) {
            return None;
        }

        let parent_cx = parent.map_or_else(Context::new, |p| p.context().clone());
        let name = format!("{service}.{operation}");
        let span = self
            .tracer
            .span_builder(name.clone())
            .with_kind(SpanKind::Client)
            .with_attributes(vec![
                KeyValue::new("rpc.system", AWS_RPC_SYSTEM),
                KeyValue::new("rpc.service", service.to_string()),
                KeyValue::new("rpc.method", operation.to_string()),
            ])
            .start_with_context(&self.tracer, &parent_cx);

        Some(Activity::new(
            name,
            ActivitySource::Vendor,
            parent_cx.with_span(span),
            parent.map(Activity::span_id),
        ))
    }

    /// Ends a service-call span.
    pub fn finish(&self, activity: &Activity, error: Option<&dyn Display>) {
        record_outcome(activity, None, u16::MAX, error, true);
    }
}

/// One client span per outgoing HTTP request.
#[derive(Clone)]
pub struct HttpClientInstrumentation {
    tracer: SdkTracer,
    propagation: Propagation,
    options: HttpClientInstrumentationOptions,
    suppress_inside_vendor: bool,
}

impl HttpClientInstrumentation {
    pub(crate) fn new(
        tracer: SdkTracer,
        propagation: Propagation,
        options: HttpClientInstrumentationOptions,
        suppress_inside_vendor: bool,
    ) -> Self {
        Self {
            tracer,
            propagation,
            options,
            suppress_inside_vendor,
        }
    }

    /// The bound options.
    #[must_use]
    pub fn options(&self) -> &HttpClientInstrumentationOptions {
        &self.options
    }

    /// Starts the span for an outgoing request and writes the trace headers.
    ///
    /// No span is created for excluded hosts or, when downstream suppression
    /// is on, inside a vendor-call span. The parent's context is still
    /// injected in those cases so the trace continues downstream.
    pub fn start_request(
        &self,
        parent: Option<&Activity>,
        method: &Method,
        url: &str,
        headers: &mut HeaderMap,
    ) -> Option<Activity> {
        let parent_cx = parent.map_or_else(Context::new, |p| p.context().clone());
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();

        let suppressed = self.suppress_inside_vendor
            && parent.is_some_and(|p| p.source() == ActivitySource::Vendor);
        if suppressed || self.options.is_excluded(&host) {
            self.propagation.inject(&parent_cx, headers);
            return None;
        }

        let span = self
            .tracer
            .span_builder(method.to_string())
            .with_kind(SpanKind::Client)
            .with_attributes(vec![
                KeyValue::new(HTTP_REQUEST_METHOD, method.to_string()),
                KeyValue::new(URL_FULL, url.to_string()),
                KeyValue::new(SERVER_ADDRESS, host),
            ])
            .start_with_context(&self.tracer, &parent_cx);

        let activity = Activity::new(
            method.as_str(),
            ActivitySource::Client,
            parent_cx.with_span(span),
            parent.map(Activity::span_id),
        );
        self.propagation.inject(activity.context(), headers);
        Some(activity)
    }

    /// Records the response (or transport error) and ends the span.
    pub fn finish(&self, activity: &Activity, status: Option<u16>, error: Option<&dyn Display>) {
        record_outcome(activity, status, 400, error, self.options.record_exception);
    }
}

impl std::fmt::Debug for ServerInstrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstrumentation")
            .field("propagation", &self.propagation)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for AwsInstrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsInstrumentation")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for HttpClientInstrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientInstrumentation")
            .field("options", &self.options)
            .field("suppress_inside_vendor", &self.suppress_inside_vendor)
            .finish_non_exhaustive()
    }
}
