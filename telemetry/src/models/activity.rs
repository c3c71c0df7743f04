//! Activities: spans carried explicitly through a request flow.
//!
//! An [`Activity`] wraps the OpenTelemetry [`Context`] holding one span,
//! plus the fields log enrichment needs (parent id, tags, baggage). It is
//! cheap to clone and is handed to request handlers alongside the request,
//! so nothing has to look up a thread-local "current span".

use chrono::{DateTime, Utc};
use opentelemetry::baggage::BaggageExt;
use opentelemetry::trace::{SpanId, Status, TraceContextExt, TraceId};
use opentelemetry::{Context, KeyValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which instrumentation source created an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    /// Inbound request handled by this process.
    Server,
    /// Outgoing HTTP request made by this process.
    Client,
    /// Call into a vendor (AWS) service API.
    Vendor,
    /// Work created by the host itself.
    Internal,
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Vendor => write!(f, "vendor"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Completion status of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    /// No status was recorded.
    #[default]
    Unset,
    /// The operation succeeded.
    Ok,
    /// The operation failed.
    Error(String),
}

/// One unit of traced work.
#[derive(Clone)]
pub struct Activity {
    inner: Arc<ActivityInner>,
}

struct ActivityInner {
    name: String,
    source: ActivitySource,
    context: Context,
    parent_span_id: Option<SpanId>,
    start_time: DateTime<Utc>,
    state: Mutex<ActivityState>,
}

#[derive(Default)]
struct ActivityState {
    tags: BTreeMap<String, String>,
    status: ActivityStatus,
    end_time: Option<DateTime<Utc>>,
}

impl Activity {
    /// Wraps a context that already holds a started span.
    ///
    /// `parent_span_id` is the span this one was started under, local or remote.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        source: ActivitySource,
        context: Context,
        parent_span_id: Option<SpanId>,
    ) -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                name: name.into(),
                source,
                context,
                parent_span_id: parent_span_id.filter(|id| *id != SpanId::INVALID),
                start_time: Utc::now(),
                state: Mutex::new(ActivityState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ActivityState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The instrumentation source that created this activity.
    #[must_use]
    pub fn source(&self) -> ActivitySource {
        self.inner.source
    }

    /// The OpenTelemetry context holding the span and its baggage.
    ///
    /// Use it as the parent when starting child spans or injecting headers.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// The trace this activity belongs to.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.inner.context.span().span_context().trace_id()
    }

    /// This activity's span id.
    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.inner.context.span().span_context().span_id()
    }

    /// Whether the span carries the sampled trace flag.
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.inner.context.span().span_context().is_sampled()
    }

    /// The parent span id, `None` for root spans.
    #[must_use]
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.parent_span_id
    }

    /// Baggage entries propagated with this activity.
    #[must_use]
    pub fn baggage(&self) -> BTreeMap<String, String> {
        self.inner
            .context
            .baggage()
            .iter()
            .map(|(key, (value, _))| (key.to_string(), value.to_string()))
            .collect()
    }

    /// A snapshot of the tags recorded so far.
    #[must_use]
    pub fn tags(&self) -> BTreeMap<String, String> {
        self.state().tags.clone()
    }

    /// Records a tag on the activity and as an attribute on its span.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.inner
            .context
            .span()
            .set_attribute(KeyValue::new(key.clone(), value.clone()));
        self.state().tags.insert(key, value);
    }

    /// Records the completion status.
    pub fn set_status(&self, status: ActivityStatus) {
        let span = self.inner.context.span();
        match &status {
            ActivityStatus::Unset => {}
            ActivityStatus::Ok => span.set_status(Status::Ok),
            ActivityStatus::Error(message) => span.set_status(Status::error(message.clone())),
        }
        self.state().status = status;
    }

    /// The recorded status.
    #[must_use]
    pub fn status(&self) -> ActivityStatus {
        self.state().status.clone()
    }

    /// When the activity started.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    /// When the activity ended, if it has.
    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state().end_time
    }

    /// Whether [`Activity::end`] has been called.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state().end_time.is_some()
    }

    /// Ends the span and hands it to the exporters. Idempotent.
    pub fn end(&self) {
        let mut state = self.state();
        if state.end_time.is_some() {
            return;
        }
        state.end_time = Some(Utc::now());
        drop(state);

        self.inner.context.span().end();
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("name", &self.inner.name)
            .field("source", &self.inner.source)
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .field("parent_span_id", &self.inner.parent_span_id)
            .finish_non_exhaustive()
    }
}
