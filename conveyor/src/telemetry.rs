//! Logging, error reporting and metrics setup for the binary.
use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use sentry::types::Dsn;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const METRICS_PREFIX: &str = "conveyor";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid sentry DSN: {0}")]
    SentryDsn(String),
    #[error("could not build statsd exporter: {0}")]
    Statsd(String),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error("could not install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps error reporting alive. Pending events are flushed when dropped.
pub struct TelemetryGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

pub fn init(
    logging: Option<&LoggingConfig>,
    metrics: Option<&MetricsConfig>,
) -> Result<TelemetryGuard, TelemetryError> {
    let sentry = match logging {
        Some(logging) => {
            let dsn = Dsn::from_str(&logging.sentry_dsn)
                .map_err(|e| TelemetryError::SentryDsn(e.to_string()))?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = sentry
        .is_some()
        .then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_layer)
        .try_init()?;

    if let Some(metrics) = metrics {
        let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
            .build(Some(METRICS_PREFIX))
            .map_err(|e| TelemetryError::Statsd(e.to_string()))?;
        metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderInstalled)?;
        tracing::info!(
            host = %metrics.statsd_host,
            port = metrics.statsd_port,
            "Exporting metrics to statsd"
        );
    }

    shared::metrics_defs::describe_all(packages::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(docs::metrics_defs::ALL_METRICS);

    Ok(TelemetryGuard { _sentry: sentry })
}
