//! Service identity.
//!
//! The [`ResourceDescriptor`] is built once at startup and shared by reference
//! with every pipeline, so traces and logs of one process are always attributed
//! to the same resource.

use crate::config::{binder::Section, ConfigSource};
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::ResourceBuilder;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use serde::{Deserialize, Serialize};

/// Service name used when `ServiceName` is not configured.
pub const DEFAULT_SERVICE_NAME: &str = "otel-test";

/// Fallback for version and instance when they cannot be determined.
pub const UNKNOWN: &str = "unknown";

/// Resource attribute key for the instance identity.
const SERVICE_INSTANCE_ID: &str = "service.instance.id";

/// Immutable service-identity record.
///
/// All three fields are always present; missing inputs fall back to defaults.
///
/// # Example
///
/// ```
/// use telemetry::config::MapSource;
/// use telemetry::models::ResourceDescriptor;
///
/// let source = MapSource::from([("ServiceName", "checkout-api")]);
/// let resource = ResourceDescriptor::from_config(&source, Some("1.4.0"));
///
/// assert_eq!(resource.service_name, "checkout-api");
/// assert_eq!(resource.service_version, "1.4.0");
/// assert!(!resource.service_instance_id.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Logical service name.
    pub service_name: String,
    /// Version of the running build.
    pub service_version: String,
    /// Identity of this process instance (host name).
    pub service_instance_id: String,
}

impl ResourceDescriptor {
    /// Creates a descriptor from explicit values. Blank values fall back to defaults.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        service_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            service_name: non_blank(service_name.into())
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.into()),
            service_version: non_blank(service_version.into()).unwrap_or_else(|| UNKNOWN.into()),
            service_instance_id: non_blank(service_instance_id.into())
                .unwrap_or_else(host_identity),
        }
    }

    /// Builds the descriptor from configuration. Never fails.
    ///
    /// - `ServiceName` (default `otel-test`)
    /// - `ServiceInstanceId` (default: the host name)
    /// - the version comes from build metadata (default `unknown`)
    #[must_use]
    pub fn from_config(source: &dyn ConfigSource, build_version: Option<&str>) -> Self {
        let root = Section::root(source);
        Self::new(
            root.string_or("ServiceName", DEFAULT_SERVICE_NAME),
            build_version.unwrap_or(UNKNOWN),
            root.get("ServiceInstanceId").unwrap_or_default(),
        )
    }

    /// Applies this identity to a resource builder.
    ///
    /// This is the single resource hook used by the trace pipeline and by the
    /// OTLP log sink.
    #[must_use]
    pub fn configure(&self, builder: ResourceBuilder) -> ResourceBuilder {
        builder
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new(SERVICE_VERSION, self.service_version.clone()),
                KeyValue::new(SERVICE_INSTANCE_ID, self.service_instance_id.clone()),
            ])
    }

    /// Builds an OpenTelemetry resource on top of the SDK's default detectors.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        self.configure(Resource::builder()).build()
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// The machine name, or `unknown`.
fn host_identity() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .and_then(non_blank)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapSource;
    use opentelemetry::Key;

    #[test]
    fn test_defaults_when_nothing_configured() {
        let resource = ResourceDescriptor::from_config(&MapSource::new(), None);

        assert_eq!(resource.service_name, "otel-test");
        assert_eq!(resource.service_version, "unknown");
        assert!(!resource.service_instance_id.is_empty());
    }

    #[test]
    fn test_blank_values_fall_back() {
        let resource = ResourceDescriptor::new("  ", "", "");

        assert_eq!(resource.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(resource.service_version, UNKNOWN);
        assert!(!resource.service_instance_id.is_empty());
    }

    #[test]
    fn test_instance_id_override() {
        let source = MapSource::from([("ServiceInstanceId", "pod-7")]);
        let resource = ResourceDescriptor::from_config(&source, Some("2.0.0"));

        assert_eq!(resource.service_instance_id, "pod-7");
        assert_eq!(resource.service_version, "2.0.0");
    }

    #[test]
    fn test_same_config_same_descriptor() {
        let source = MapSource::from([("ServiceName", "billing"), ("ServiceInstanceId", "i-1")]);

        let for_traces = ResourceDescriptor::from_config(&source, Some("1.0.0"));
        let for_logs = ResourceDescriptor::from_config(&source, Some("1.0.0"));

        assert_eq!(for_traces, for_logs);
    }

    #[test]
    fn test_to_resource_carries_identity() {
        let resource = ResourceDescriptor::new("billing", "1.0.0", "i-1").to_resource();

        assert_eq!(
            resource.get(&Key::new("service.name")).map(|v| v.to_string()),
            Some("billing".to_string())
        );
        assert_eq!(
            resource.get(&Key::new("service.version")).map(|v| v.to_string()),
            Some("1.0.0".to_string())
        );
        assert_eq!(
            resource.get(&Key::new("service.instance.id")).map(|v| v.to_string()),
            Some("i-1".to_string())
        );
    }
}
