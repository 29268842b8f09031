use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_BUILD_FAILURES, METRIC_BUILD_MS, METRIC_ORPHANS, METRIC_PAGES_BUILT,
    METRIC_QUEUE_PENDING, METRIC_URLS_ENQUEUED,
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

/// Register metric descriptions with the installed recorder. Runs once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_URLS_ENQUEUED,
            Unit::Count,
            "URLs written to the build queue by change propagation."
        );
        describe_counter!(
            METRIC_PAGES_BUILT,
            Unit::Count,
            "Artifacts processed by the cache builder, by write outcome."
        );
        describe_counter!(
            METRIC_BUILD_FAILURES,
            Unit::Count,
            "Queue entries marked as errored by the cache builder."
        );
        describe_histogram!(
            METRIC_BUILD_MS,
            Unit::Milliseconds,
            "Per-URL build latency in milliseconds."
        );
        describe_gauge!(
            METRIC_QUEUE_PENDING,
            Unit::Count,
            "Eligible queue entries left after a drain cycle."
        );
        describe_counter!(
            METRIC_ORPHANS,
            Unit::Count,
            "Orphaned artifacts found by the reconciler."
        );
    });
}
