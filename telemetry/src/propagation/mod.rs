//! Process-wide trace-context propagation.
//!
//! A [`PropagationSelector`] installs exactly one [`PropagationFormat`] per
//! process. Installing is single assignment: repeating the same format is a
//! no-op, asking for a different one is an error. The resulting
//! [`Propagation`] handle is passed by reference to whatever needs to read or
//! write trace headers.

use crate::error::{ParseValueError, TelemetryError, TelemetryResult};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::{global, Context};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub use opentelemetry_aws::trace::XrayPropagator;

/// The trace-context header format.
///
/// W3C baggage is propagated alongside either format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationFormat {
    /// AWS X-Ray (`X-Amzn-Trace-Id`).
    #[default]
    XRay,
    /// W3C Trace Context (`traceparent`, `tracestate`).
    TraceContext,
}

impl fmt::Display for PropagationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::XRay => write!(f, "xray"),
            Self::TraceContext => write!(f, "tracecontext"),
        }
    }
}

impl FromStr for PropagationFormat {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xray" | "awsxray" | "aws" => Ok(Self::XRay),
            "tracecontext" | "w3c" => Ok(Self::TraceContext),
            _ => Err(ParseValueError {
                expected: "xray, tracecontext",
            }),
        }
    }
}

fn build_propagator(format: PropagationFormat) -> TextMapCompositePropagator {
    let primary: Box<dyn TextMapPropagator + Send + Sync> = match format {
        PropagationFormat::XRay => Box::new(XrayPropagator::new()),
        PropagationFormat::TraceContext => Box::new(TraceContextPropagator::new()),
    };
    TextMapCompositePropagator::new(vec![primary, Box::new(BaggagePropagator::new())])
}

/// The installed propagation format.
///
/// Cheap to clone; every clone shares the same propagator.
#[derive(Clone)]
pub struct Propagation {
    format: PropagationFormat,
    propagator: Arc<TextMapCompositePropagator>,
}

impl Propagation {
    fn new(format: PropagationFormat) -> Self {
        Self {
            format,
            propagator: Arc::new(build_propagator(format)),
        }
    }

    /// The installed format.
    #[must_use]
    pub fn format(&self) -> PropagationFormat {
        self.format
    }

    /// Reads the remote parent context (and baggage) from request headers.
    ///
    /// Returns an empty context when the headers carry none.
    #[must_use]
    pub fn extract(&self, headers: &HeaderMap) -> Context {
        self.propagator
            .extract_with_context(&Context::new(), &HeaderExtractor(headers))
    }

    /// Writes the context's span and baggage into outgoing headers.
    pub fn inject(&self, cx: &Context, headers: &mut HeaderMap) {
        self.propagator
            .inject_context(cx, &mut HeaderInjector(headers));
    }

    /// Header names this format reads and writes.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        self.propagator.fields().map(ToString::to_string).collect()
    }
}

impl fmt::Debug for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagation")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Single-assignment holder for the process propagation format.
///
/// [`PropagationSelector::global`] is the process-wide instance; it also
/// registers the format with the OpenTelemetry global propagator. Separate
/// instances created with [`PropagationSelector::new`] are isolated and are
/// what tests use.
///
/// # Example
///
/// ```
/// use telemetry::propagation::{PropagationFormat, PropagationSelector};
///
/// let selector = PropagationSelector::new();
/// let first = selector.install(PropagationFormat::XRay).unwrap();
/// let again = selector.install(PropagationFormat::XRay).unwrap();
///
/// assert_eq!(first.format(), again.format());
/// assert_eq!(selector.install_count(), 1);
/// assert!(selector.install(PropagationFormat::TraceContext).is_err());
/// ```
#[derive(Debug)]
pub struct PropagationSelector {
    installed: OnceLock<Propagation>,
    installs: AtomicUsize,
    register_global: bool,
}

static PROCESS_SELECTOR: PropagationSelector = PropagationSelector {
    installed: OnceLock::new(),
    installs: AtomicUsize::new(0),
    register_global: true,
};

impl PropagationSelector {
    /// Creates an isolated selector that does not touch global state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            installed: OnceLock::new(),
            installs: AtomicUsize::new(0),
            register_global: false,
        }
    }

    /// The process-wide selector.
    #[must_use]
    pub fn global() -> &'static Self {
        &PROCESS_SELECTOR
    }

    /// Installs `format`, or returns the already-installed handle.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::PropagationConflict`] if a different format
    /// was installed first.
    pub fn install(&self, format: PropagationFormat) -> TelemetryResult<Propagation> {
        let mut first_install = false;
        let propagation = self.installed.get_or_init(|| {
            first_install = true;
            Propagation::new(format)
        });

        if propagation.format != format {
            return Err(TelemetryError::PropagationConflict {
                installed: propagation.format.to_string(),
                requested: format.to_string(),
            });
        }

        if first_install {
            self.installs.fetch_add(1, Ordering::SeqCst);
            if self.register_global {
                global::set_text_map_propagator(build_propagator(format));
            }
            tracing::info!(format = %format, "Installed propagation format");
        } else {
            tracing::debug!(format = %format, "Propagation format already installed");
        }

        Ok(propagation.clone())
    }

    /// The installed handle, if any.
    #[must_use]
    pub fn installed(&self) -> Option<Propagation> {
        self.installed.get().cloned()
    }

    /// How many times a format was actually installed (0 or 1).
    #[must_use]
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl Default for PropagationSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads propagation headers from an [`http::HeaderMap`].
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Writes propagation headers into an [`http::HeaderMap`].
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to create header name for trace injection");
                return;
            }
        };
        let val = match HeaderValue::from_str(&value) {
            Ok(val) => val,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to create header value for trace injection");
                return;
            }
        };
        self.0.insert(name, val);
    }
}
