use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::application::analytics::{DEFAULT_SUMMARY_LIMIT, DEFAULT_WINDOW_HOURS};

/// Command-line arguments for the readtrail binary.
#[derive(Debug, Parser)]
#[command(
    name = "readtrail",
    version,
    about = "Visitor session tracking collector"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "READTRAIL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the tracking collector HTTP service.
    Serve(Box<ServeArgs>),
    /// Print per-page engagement summaries as JSON.
    Report(ReportArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the store backend (postgres|rest).
    #[arg(long = "store-backend", value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the REST row-store base URL.
    #[arg(long = "rest-url", value_name = "URL")]
    pub rest_url: Option<String>,

    /// Override the REST row-store API key.
    #[arg(long = "rest-api-key", env = "READTRAIL_REST_API_KEY", value_name = "KEY")]
    pub rest_api_key: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the REST request timeout.
    #[arg(long = "rest-timeout-ms", value_name = "MS")]
    pub rest_timeout_ms: Option<u64>,

    /// Override the tracking environment (development|production).
    #[arg(long = "tracking-environment", value_name = "ENV")]
    pub tracking_environment: Option<String>,

    /// Toggle tracking writes entirely.
    #[arg(
        long = "tracking-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub tracking_enabled: Option<bool>,

    /// Record analytics even in the development environment.
    #[arg(
        long = "track-in-development",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub track_in_development: Option<bool>,

    /// Override how long a collector session may stay idle before it expires.
    #[arg(long = "registry-idle-timeout-seconds", value_name = "SECONDS")]
    pub registry_idle_timeout_seconds: Option<u64>,

    /// Override how often idle collector sessions are swept.
    #[arg(long = "registry-sweep-interval-seconds", value_name = "SECONDS")]
    pub registry_sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Only include activity from the last N hours.
    #[arg(long = "since-hours", default_value_t = DEFAULT_WINDOW_HOURS)]
    pub since_hours: u32,

    /// Maximum number of pages to print.
    #[arg(long, default_value_t = DEFAULT_SUMMARY_LIMIT)]
    pub limit: u32,
}
