//! Configuration for telemetry assembly.
//!
//! Values come from one or more [`ConfigSource`]s (in-memory maps, the
//! environment, JSON settings files) and are bound into the typed
//! [`TelemetrySettings`] at bootstrap.

pub(crate) mod binder;
pub mod settings;
pub mod source;

pub use settings::{
    AwsInstrumentationOptions, CloudWatchSinkSettings, ConsoleSinkSettings, ExporterSettings,
    HttpClientInstrumentationOptions, LoggingSettings, OtlpLogSettings,
    ServerInstrumentationOptions, SinkConfig, TelemetrySettings,
};
pub use source::{ConfigSource, ConfigSources, EnvSource, JsonFileSource, MapSource};
