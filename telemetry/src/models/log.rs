//! Log record model.
//!
//! Defines the [`LogRecord`] handed to every sink and the [`Correlation`]
//! fields copied onto it from the active activity.

use crate::error::ParseValueError;
use chrono::{DateTime, Utc};
use opentelemetry::logs::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Log severity level.
///
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed diagnostic information.
    Trace,
    /// Debug information.
    Debug,
    /// Informational messages.
    Info,
    /// Warning conditions.
    Warn,
    /// Error conditions.
    Error,
    /// Critical/fatal conditions.
    Fatal,
}

impl LogLevel {
    /// Three-letter code used by the console template (`{Level:u3}`).
    #[must_use]
    pub fn short_code(self) -> &'static str {
        match self {
            Self::Trace => "TRC",
            Self::Debug => "DBG",
            Self::Info => "INF",
            Self::Warn => "WRN",
            Self::Error => "ERR",
            Self::Fatal => "FTL",
        }
    }

    /// OpenTelemetry severity number for this level.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::Trace => Severity::Trace,
            Self::Debug => Severity::Debug,
            Self::Info => Severity::Info,
            Self::Warn => Severity::Warn,
            Self::Error => Severity::Error,
            Self::Fatal => Severity::Fatal,
        }
    }

    /// Upper-case name, as used for severity text.
    #[must_use]
    pub fn as_upper_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl FromStr for LogLevel {
    type Err = ParseValueError;

    /// Accepts both the short names (`info`, `warn`) and the long names used
    /// by `Logging:LogLevel` sections (`Information`, `Warning`, `Critical`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" | "information" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            _ => Err(ParseValueError {
                expected: "Trace, Debug, Information, Warning, Error, Critical",
            }),
        }
    }
}

/// Correlation fields copied from the active activity.
///
/// With no active activity every field is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    /// Trace id as 32 lowercase hex characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span id as 16 lowercase hex characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Parent span id, if the activity has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Propagated baggage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,

    /// Activity tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Whether the activity's span was sampled.
    #[serde(skip)]
    pub sampled: bool,
}

impl Correlation {
    /// Returns true if no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none()
            && self.span_id.is_none()
            && self.parent_id.is_none()
            && self.baggage.is_empty()
            && self.tags.is_empty()
    }
}

/// A single application log event.
///
/// # Example
///
/// ```
/// use telemetry::models::{LogLevel, LogRecord};
///
/// let record = LogRecord::new(LogLevel::Warn, "checkout::payment", "card declined")
///     .with_exception("PaymentError: insufficient funds");
///
/// assert!(record.correlation.is_empty());
/// assert_eq!(record.exception.as_deref(), Some("PaymentError: insufficient funds"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Severity level.
    pub level: LogLevel,

    /// Logger category, usually a module path.
    pub category: String,

    /// The rendered message.
    pub message: String,

    /// Error details, if the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,

    /// Fields copied from the active activity.
    #[serde(default)]
    pub correlation: Correlation,
}

impl LogRecord {
    /// Creates a record stamped with the current time and no correlation.
    #[must_use]
    pub fn new(level: LogLevel, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            category: category.into(),
            message: message.into(),
            exception: None,
            correlation: Correlation::default(),
        }
    }

    /// Attaches error details.
    #[must_use]
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
