//! Error types for telemetry assembly.
//!
//! [`ConfigError`] and [`TelemetryError`] are bootstrap-phase errors that abort
//! startup. [`DeliveryError`] never leaves the durable sink that hit it.

use thiserror::Error;

/// Result type alias for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors raised while loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key without a default was not configured.
    #[error("Missing required configuration key `{0}`")]
    MissingKey(String),

    /// A configured value could not be interpreted.
    #[error("Invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The raw configured value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The collector endpoint is not an absolute http(s) URI.
    #[error("Invalid collector endpoint `{value}`: {reason}")]
    InvalidEndpoint {
        /// The raw configured endpoint.
        value: String,
        /// Why the endpoint was rejected.
        reason: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("Failed to read configuration file `{path}`: {reason}")]
    File {
        /// The file path.
        path: String,
        /// The underlying I/O or parse failure.
        reason: String,
    },

    /// Struct-level validation failed.
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ConfigError {
    pub(crate) fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A string did not name any known variant of a configuration enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected one of: {expected}")]
pub struct ParseValueError {
    /// The accepted spellings.
    pub expected: &'static str,
}

/// Failures reported by a log-ingestion client.
///
/// These stay inside the durable sink: they are logged, counted and retried,
/// never returned to the code that emitted the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The log stream could not be created.
    #[error("Failed to create log stream `{stream}`: {reason}")]
    CreateStream {
        /// The stream name.
        stream: String,
        /// The client's failure message.
        reason: String,
    },

    /// A batch of events was rejected or could not be sent.
    #[error("Failed to put {count} log events: {reason}")]
    PutEvents {
        /// Number of events in the failed batch.
        count: usize,
        /// The client's failure message.
        reason: String,
    },
}

/// Telemetry error types.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An instrumentation source could not be attached to the trace pipeline.
    #[error("Instrumentation source `{source_name}` failed to attach: {reason}")]
    Attach {
        /// Name of the instrumentation source.
        source_name: &'static str,
        /// Why attaching failed.
        reason: String,
    },

    /// A different propagation format was already installed for this process.
    #[error(
        "Propagation format already installed as `{installed}`, cannot switch to `{requested}`"
    )]
    PropagationConflict {
        /// The format installed first.
        installed: String,
        /// The format requested afterwards.
        requested: String,
    },

    /// An exporter could not be constructed.
    #[error("Exporter error: {0}")]
    Exporter(String),

    /// A log sink could not be started, flushed or stopped.
    #[error("Log sink `{sink}` failed: {reason}")]
    Sink {
        /// Name of the sink.
        sink: String,
        /// Why the sink failed.
        reason: String,
    },

    /// The pipelines were registered with the host more than once.
    #[error("Telemetry is already registered with the host")]
    AlreadyRegistered,

    /// Shutdown error.
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_telemetry_error() {
        let err: TelemetryError =
            ConfigError::MissingKey("Logging:CloudWatch:LogGroup".into()).into();
        assert!(matches!(err, TelemetryError::Config(ConfigError::MissingKey(_))));
        assert!(err.to_string().contains("Logging:CloudWatch:LogGroup"));
    }

    #[test]
    fn test_attach_error_names_source() {
        let err = TelemetryError::Attach {
            source_name: "aws",
            reason: "no services in scope".into(),
        };
        assert_eq!(
            err.to_string(),
            "Instrumentation source `aws` failed to attach: no services in scope"
        );
    }
}
