use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the examdash binary.
#[derive(Debug, Parser)]
#[command(
    name = "examdash",
    version,
    about = "Exam dashboard server-state cache client"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "EXAMDASH_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List the cacheable resources and their freshness windows.
    Resources,
    /// Load a resource through the cache and print its records as JSON.
    List(ListArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    /// Resource to load (students, classes, exams, ...).
    #[arg(value_name = "RESOURCE")]
    pub resource: String,

    /// Case-insensitive substring filter applied to the loaded records.
    #[arg(long, value_name = "QUERY")]
    pub search: Option<String>,

    /// Fields the search matches against; defaults to the resource's search fields.
    #[arg(long, value_name = "FIELD", value_delimiter = ',')]
    pub fields: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the dashboard API base URL.
    #[arg(long = "api-base-url", value_name = "URL", value_hint = ValueHint::Url, global = true)]
    pub api_base_url: Option<String>,

    /// Override the per-request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS", global = true)]
    pub api_timeout_seconds: Option<u64>,

    /// Bearer token sent with every request.
    #[arg(
        long = "api-token",
        env = "EXAMDASH_API_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub api_token: Option<String>,

    /// Override the default freshness window.
    #[arg(long = "cache-stale-seconds", value_name = "SECONDS", global = true)]
    pub cache_stale_seconds: Option<u64>,
}
