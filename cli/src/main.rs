//! otelboot CLI
//!
//! Command-line tool for checking what telemetry a configuration assembles,
//! without starting the host.
//!
//! # Usage
//!
//! ```bash
//! otelboot --help
//! otelboot config
//! otelboot --settings deploy/appsettings.json resource
//! otelboot stream-name --at 2024-05-01T13:45:30Z
//! ```

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use telemetry::config::{ConfigSource, ConfigSources, TelemetrySettings};
use telemetry::logs::cloudwatch::log_stream_name;
use telemetry::ResourceDescriptor;

/// otelboot CLI - inspect telemetry configuration
#[derive(Parser)]
#[command(name = "otelboot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON settings file, layered under the environment
    #[arg(
        short,
        long,
        env = "OTELBOOT_SETTINGS",
        default_value = "appsettings.json"
    )]
    settings: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bound and validated telemetry settings
    Config,
    /// Print the service identity
    Resource {
        /// Build version to report
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        service_version: String,
    },
    /// Print the durable log-stream name for a start time
    StreamName {
        /// Stream prefix; defaults to Logging:CloudWatch:LogStreamPrefix
        #[arg(long)]
        prefix: Option<String>,
        /// Process start time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

fn print_json<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn run(cli: Cli, source: &dyn ConfigSource, out: &mut impl Write) -> Result<()> {
    match cli.command {
        Some(Commands::Config) => {
            let settings = TelemetrySettings::load(source)?;
            print_json(out, &settings)?;
        }
        Some(Commands::Resource { service_version }) => {
            let resource = ResourceDescriptor::from_config(source, Some(&service_version));
            print_json(out, &resource)?;
        }
        Some(Commands::StreamName { prefix, at }) => {
            let prefix = match prefix {
                Some(prefix) => prefix,
                None => TelemetrySettings::load(source)?
                    .logging
                    .cloudwatch
                    .log_stream_prefix,
            };
            writeln!(out, "{}", log_stream_name(&prefix, at.unwrap_or_else(Utc::now)))?;
        }
        None => {
            writeln!(out, "otelboot CLI v{}", env!("CARGO_PKG_VERSION"))?;
            writeln!(out, "Use --help for usage information")?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let source = ConfigSources::standard(Some(&cli.settings))
        .with_context(|| format!("Failed to load {}", cli.settings.display()))?;

    run(cli, &source, &mut std::io::stdout().lock())
}
