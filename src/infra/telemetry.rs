use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::mutation::{METRIC_MUTATION_MS, METRIC_MUTATION_TOTAL};
use crate::cache::{
    METRIC_DEDUP_TOTAL, METRIC_EVENT_DROPPED, METRIC_EVENT_QUEUE_LEN, METRIC_EVICT_TOTAL,
    METRIC_FETCH_ERROR_TOTAL, METRIC_FETCH_MS, METRIC_FETCH_TOTAL, METRIC_INVALIDATE_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_FETCH_TOTAL,
            Unit::Count,
            "Total number of fetches started by the cache."
        );
        describe_counter!(
            METRIC_DEDUP_TOTAL,
            Unit::Count,
            "Total number of reads that joined an in-flight fetch instead of starting one."
        );
        describe_counter!(
            METRIC_FETCH_ERROR_TOTAL,
            Unit::Count,
            "Total number of failed cache fetches."
        );
        describe_counter!(
            METRIC_INVALIDATE_TOTAL,
            Unit::Count,
            "Total number of cache entries marked stale."
        );
        describe_counter!(
            METRIC_EVICT_TOTAL,
            Unit::Count,
            "Total number of cache entries evicted after disuse."
        );
        describe_histogram!(
            METRIC_FETCH_MS,
            Unit::Milliseconds,
            "Cache fetch latency in milliseconds."
        );
        describe_gauge!(
            METRIC_EVENT_QUEUE_LEN,
            Unit::Count,
            "Current number of pending cache events in the queue."
        );
        describe_counter!(
            METRIC_EVENT_DROPPED,
            Unit::Count,
            "Total number of cache events dropped due to queue overflow."
        );
        describe_counter!(
            METRIC_MUTATION_TOTAL,
            Unit::Count,
            "Total number of remote writes, labelled by outcome."
        );
        describe_histogram!(
            METRIC_MUTATION_MS,
            Unit::Milliseconds,
            "Remote write latency in milliseconds."
        );
    });
}
