//! The trace exporter endpoint.

use crate::error::ConfigError;
use serde::{Serialize, Serializer};
use std::fmt;
use url::Url;

/// Collector endpoint used when `OpenTelemetry:CollectorEndpoint` is not configured.
pub const DEFAULT_COLLECTOR_ENDPOINT: &str = "http://localhost:4317";

/// The endpoint URI of the durable trace exporter.
///
/// Resolved once at bootstrap and shared read-only afterwards. The value is
/// kept exactly as configured; parsing only validates it.
///
/// # Example
///
/// ```
/// use telemetry::trace::ExporterTarget;
///
/// let target = ExporterTarget::parse("http://collector:4318").unwrap();
/// assert_eq!(target.as_str(), "http://collector:4318");
/// assert_eq!(ExporterTarget::default().as_str(), "http://localhost:4317");
/// assert!(ExporterTarget::parse("collector:4318").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExporterTarget {
    raw: String,
    host: String,
    port: Option<u16>,
}

impl ExporterTarget {
    /// Validates an endpoint: an absolute `http` or `https` URI with a host.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] if the value is not such a URI.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let raw = value.trim();
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing host")),
        };

        Ok(Self {
            raw: raw.to_string(),
            host,
            port: url.port_or_known_default(),
        })
    }

    /// The endpoint as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The endpoint host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The endpoint port, explicit or implied by the scheme.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl Default for ExporterTarget {
    fn default() -> Self {
        Self {
            raw: DEFAULT_COLLECTOR_ENDPOINT.to_string(),
            host: "localhost".to_string(),
            port: Some(4317),
        }
    }
}

impl fmt::Display for ExporterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ExporterTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
