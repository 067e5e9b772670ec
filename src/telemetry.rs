use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::proxy::{
    METRIC_FALLBACK_HIT, METRIC_FALLBACK_MISS, METRIC_PRIMARY_QUERY_MS, METRIC_WRITE,
    METRIC_WRITE_ERROR, METRIC_WRITE_SKIPPED,
};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError(format!("failed to install tracing subscriber: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_FALLBACK_HIT,
            Unit::Count,
            "Total number of fallback reads served from the cache store."
        );
        describe_counter!(
            METRIC_FALLBACK_MISS,
            Unit::Count,
            "Total number of fallback reads that found no cached entry."
        );
        describe_counter!(
            METRIC_WRITE,
            Unit::Count,
            "Total number of cache write-throughs."
        );
        describe_counter!(
            METRIC_WRITE_ERROR,
            Unit::Count,
            "Total number of swallowed cache write failures."
        );
        describe_counter!(
            METRIC_WRITE_SKIPPED,
            Unit::Count,
            "Total number of write-throughs skipped because the cached value was unchanged."
        );
        describe_histogram!(
            METRIC_PRIMARY_QUERY_MS,
            Unit::Milliseconds,
            "Primary store query latency in milliseconds."
        );
    });
}
