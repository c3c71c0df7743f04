//! Server configuration module.
//!
//! The listener settings come from environment variables; telemetry settings
//! come from the layered configuration source (settings file, then
//! environment).

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use telemetry::config::ConfigSources;

/// Default settings file, read when present.
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// Server configuration.
///
/// Configuration values can be set via environment variables:
/// - `OTELBOOT_HOST`: The host address to bind to (default: "0.0.0.0")
/// - `OTELBOOT_PORT`: The port to listen on (default: 8080)
/// - `OTELBOOT_SETTINGS`: Optional JSON settings file (default: "appsettings.json")
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// The JSON settings file layered under the environment.
    pub settings_file: PathBuf,
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `OTELBOOT_PORT` is set but is not a valid port number.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("OTELBOOT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("OTELBOOT_PORT")
            .ok()
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("OTELBOOT_PORT is not a valid port")?
            .unwrap_or(8080);

        let settings_file = std::env::var("OTELBOOT_SETTINGS")
            .map_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from);

        Ok(Self {
            host,
            port,
            settings_file,
        })
    }

    /// Returns the socket address for binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a valid socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// The telemetry configuration: the settings file if it exists, overridden
    /// by the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but cannot be parsed.
    pub fn config_source(&self) -> Result<ConfigSources> {
        ConfigSources::standard(Some(&self.settings_file)).with_context(|| {
            format!("Failed to load settings from {}", self.settings_file.display())
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            settings_file: PathBuf::from(DEFAULT_SETTINGS_FILE),
        }
    }
}
