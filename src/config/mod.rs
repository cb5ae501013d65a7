//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, GlobalOverrides, ListArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "examdash";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/api/";
const DEFAULT_API_TIMEOUT_SECS: u64 = 15;
const DEFAULT_STALE_SECS: u64 = 60;
const DEFAULT_EVICT_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
const DEFAULT_MIRROR_SYNC_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub api: ApiSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Always ends with `/` so resource paths join beneath it.
    pub base_url: Url,
    pub timeout: Duration,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_stale_after: Duration,
    pub default_evict_after: Duration,
    pub sweep_interval: Duration,
    pub mirror_sync_interval: Duration,
    pub search_debounce: Duration,
    pub event_queue_limit: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("EXAMDASH").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    api: RawApiSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_stale_seconds: Option<u64>,
    default_evict_seconds: Option<u64>,
    sweep_interval_ms: Option<u64>,
    mirror_sync_interval_ms: Option<u64>,
    search_debounce_ms: Option<u64>,
    event_queue_limit: Option<usize>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(token) = overrides.api_token.as_ref() {
            self.api.bearer_token = Some(token.clone());
        }
        if let Some(seconds) = overrides.cache_stale_seconds {
            self.cache.default_stale_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            api,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            api: build_api_settings(api)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let mut base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS);
    let timeout = positive_duration(timeout_secs, "api.timeout_seconds", Duration::from_secs)?;

    let bearer_token = api.bearer_token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(ApiSettings {
        base_url,
        timeout,
        bearer_token,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_stale_after = positive_duration(
        cache.default_stale_seconds.unwrap_or(DEFAULT_STALE_SECS),
        "cache.default_stale_seconds",
        Duration::from_secs,
    )?;
    let default_evict_after = positive_duration(
        cache.default_evict_seconds.unwrap_or(DEFAULT_EVICT_SECS),
        "cache.default_evict_seconds",
        Duration::from_secs,
    )?;
    let sweep_interval = positive_duration(
        cache.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS),
        "cache.sweep_interval_ms",
        Duration::from_millis,
    )?;
    let mirror_sync_interval = positive_duration(
        cache
            .mirror_sync_interval_ms
            .unwrap_or(DEFAULT_MIRROR_SYNC_INTERVAL_MS),
        "cache.mirror_sync_interval_ms",
        Duration::from_millis,
    )?;
    let search_debounce = Duration::from_millis(
        cache
            .search_debounce_ms
            .unwrap_or(DEFAULT_SEARCH_DEBOUNCE_MS),
    );
    let event_queue_limit =
        NonZeroUsize::new(cache.event_queue_limit.unwrap_or(DEFAULT_EVENT_QUEUE_LIMIT))
            .ok_or_else(|| {
                LoadError::invalid("cache.event_queue_limit", "must be greater than zero")
            })?;

    Ok(CacheSettings {
        default_stale_after,
        default_evict_after,
        sweep_interval,
        mirror_sync_interval,
        search_debounce,
        event_queue_limit,
    })
}

fn positive_duration(
    value: u64,
    key: &'static str,
    unit: fn(u64) -> Duration,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}

#[cfg(test)]
mod tests;
