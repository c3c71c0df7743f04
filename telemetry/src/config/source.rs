//! Configuration sources.
//!
//! Keys are hierarchical and colon-separated (`OpenTelemetry:CollectorEndpoint`)
//! and are matched case-insensitively. Environment variables use `__` as the
//! separator (`OpenTelemetry__CollectorEndpoint`).

use crate::error::ConfigError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A source of configuration values.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait ConfigSource: Send + Sync {
    /// Looks up a single key. Returns `None` when the key is not configured.
    fn get(&self, key: &str) -> Option<String>;

    /// Returns every configured key, in its original casing.
    fn keys(&self) -> Vec<String>;
}

/// Normalizes a key for case-insensitive lookup.
pub(crate) fn normalize_key(key: &str) -> String {
    key.replace("__", ":").to_ascii_lowercase()
}

/// An in-memory configuration source.
///
/// # Example
///
/// ```
/// use telemetry::config::{ConfigSource, MapSource};
///
/// let source = MapSource::from([("ServiceName", "checkout-api")]);
/// assert_eq!(source.get("servicename").as_deref(), Some("checkout-api"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    /// Normalized key -> (original key, value).
    entries: BTreeMap<String, (String, String)>,
}

impl MapSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key/value pair, replacing any previous value for the key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a key/value pair, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().replace("__", ":");
        self.entries
            .insert(normalize_key(&key), (key, value.into()));
    }

    /// Returns the number of configured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(&normalize_key(key))
            .map(|(_, value)| value.clone())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.values().map(|(key, _)| key.clone()).collect()
    }
}

impl<K, V> FromIterator<(K, V)> for MapSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut source = Self::new();
        for (key, value) in iter {
            source.insert(key, value);
        }
        source
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for MapSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Configuration read from process environment variables.
///
/// The environment is captured once, at construction.
#[derive(Debug, Clone, Default)]
pub struct EnvSource(MapSource);

impl EnvSource {
    /// Captures the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds the source from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(vars.into_iter().collect())
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.0.keys()
    }
}

/// Configuration read from a nested JSON document such as `appsettings.json`.
///
/// Objects are flattened to `Parent:Child` keys and arrays to `Parent:0`,
/// `Parent:1`, ... Null values are skipped.
#[derive(Debug, Clone, Default)]
pub struct JsonFileSource(MapSource);

impl JsonFileSource {
    /// Loads and flattens a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };

        let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::File { reason, .. } => file_error(reason),
            other => other,
        })
    }

    /// Parses and flattens a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or its root is not an object.
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(json).map_err(|e| ConfigError::File {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;

        if !root.is_object() {
            return Err(ConfigError::File {
                path: "<inline>".to_string(),
                reason: "root element must be a JSON object".to_string(),
            });
        }

        let mut source = MapSource::new();
        flatten(&root, None, &mut source);
        Ok(Self(source))
    }
}

fn flatten(value: &Value, prefix: Option<&str>, out: &mut MapSource) {
    let child_key = |name: &str| match prefix {
        Some(prefix) => format!("{prefix}:{name}"),
        None => name.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (name, child) in map {
                flatten(child, Some(&child_key(name)), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(child, Some(&child_key(&index.to_string())), out);
            }
        }
        Value::Null => {}
        Value::String(s) => {
            if let Some(key) = prefix {
                out.insert(key, s.clone());
            }
        }
        Value::Bool(_) | Value::Number(_) => {
            if let Some(key) = prefix {
                out.insert(key, value.to_string());
            }
        }
    }
}

impl ConfigSource for JsonFileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.0.keys()
    }
}

/// Layered configuration. Later layers override earlier ones.
#[derive(Default)]
pub struct ConfigSources {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl ConfigSources {
    /// Creates an empty layered source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer on top of the existing ones.
    #[must_use]
    pub fn with(mut self, layer: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// The standard host layering: an optional JSON settings file, overridden
    /// by the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but cannot be parsed.
    pub fn standard(settings_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut sources = Self::new();
        if let Some(path) = settings_file.filter(|p| p.exists()) {
            tracing::debug!(path = %path.display(), "Loading settings file");
            sources = sources.with(JsonFileSource::load(path)?);
        }
        Ok(sources.with(EnvSource::from_env()))
    }

    /// Returns the number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if there are no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigSource for ConfigSources {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    fn keys(&self) -> Vec<String> {
        let mut seen = BTreeMap::new();
        for layer in &self.layers {
            for key in layer.keys() {
                seen.entry(normalize_key(&key)).or_insert(key);
            }
        }
        seen.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_source_is_case_insensitive() {
        let source = MapSource::from([("OpenTelemetry:CollectorEndpoint", "http://c:4317")]);

        assert_eq!(
            source.get("opentelemetry:collectorendpoint").as_deref(),
            Some("http://c:4317")
        );
        assert_eq!(source.keys(), vec!["OpenTelemetry:CollectorEndpoint"]);
    }

    #[test]
    fn test_env_source_maps_double_underscore() {
        let source = EnvSource::from_vars([("OpenTelemetry__CollectorEndpoint", "http://c:4317")]);

        assert_eq!(
            source.get("OpenTelemetry:CollectorEndpoint").as_deref(),
            Some("http://c:4317")
        );
        assert_eq!(source.keys(), vec!["OpenTelemetry:CollectorEndpoint"]);
    }

    #[test]
    fn test_json_source_flattens_nested_objects_and_arrays() {
        let source = JsonFileSource::parse(
            r#"{
                "ServiceName": "orders",
                "Logging": { "LogLevel": { "Default": "Warning" } },
                "AspNetCoreInstrumentation": { "ExcludedPaths": ["/health", "/ready"] },
                "OpenTelemetry": { "SamplingRatio": 0.5, "ConsoleExporter": true, "Unset": null }
            }"#,
        )
        .unwrap();

        assert_eq!(source.get("ServiceName").as_deref(), Some("orders"));
        assert_eq!(source.get("Logging:LogLevel:Default").as_deref(), Some("Warning"));
        assert_eq!(
            source.get("AspNetCoreInstrumentation:ExcludedPaths:1").as_deref(),
            Some("/ready")
        );
        assert_eq!(source.get("OpenTelemetry:SamplingRatio").as_deref(), Some("0.5"));
        assert_eq!(source.get("OpenTelemetry:ConsoleExporter").as_deref(), Some("true"));
        assert!(source.get("OpenTelemetry:Unset").is_none());
    }

    #[test]
    fn test_json_source_rejects_non_object_root() {
        let result = JsonFileSource::parse("[1, 2, 3]");
        assert!(matches!(result, Err(ConfigError::File { .. })));
    }

    #[test]
    fn test_json_source_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"ServiceName": "from-file"}"#).unwrap();

        let source = JsonFileSource::load(file.path()).unwrap();
        assert_eq!(source.get("ServiceName").as_deref(), Some("from-file"));
    }

    #[test]
    fn test_json_source_load_missing_file_reports_path() {
        let err = JsonFileSource::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn test_layered_sources_later_layers_win() {
        let sources = ConfigSources::new()
            .with(MapSource::from([("ServiceName", "file"), ("Logging:LogLevel:Default", "Debug")]))
            .with(MapSource::from([("SERVICENAME", "env")]));

        assert_eq!(sources.get("ServiceName").as_deref(), Some("env"));
        assert_eq!(sources.get("Logging:LogLevel:Default").as_deref(), Some("Debug"));
        assert_eq!(sources.keys().len(), 2);
    }
}
