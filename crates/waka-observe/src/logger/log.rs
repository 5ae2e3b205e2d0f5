use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

/// A layer with its own filter, ready to stack on the registry.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Compose the registry: console layer (filtered by `cfg.level`) first, then `extra`.
///
/// Filters are per layer, so `cfg.level` never hides events from `extra`.
pub fn build_subscriber(
    cfg: &LoggerConfig,
    extra: Vec<BoxedLayer>,
) -> Result<impl Subscriber + Send + Sync + 'static, LoggerError> {
    let mut layers = Vec::with_capacity(extra.len() + 1);
    layers.push(console_layer(cfg)?);
    layers.extend(extra);
    Ok(tracing_subscriber::registry().with(layers))
}

fn console_layer(cfg: &LoggerConfig) -> Result<BoxedLayer, LoggerError> {
    let filter = mk_filter(&cfg.level)?;
    let layer = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(mk_timer())
            .with_filter(filter)
            .boxed(),
        LoggerFormat::Json => fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(cfg.with_targets)
            .with_timer(mk_timer())
            .with_filter(filter)
            .boxed(),
        LoggerFormat::Journald => mk_journald(filter)?,
    };
    Ok(layer)
}

fn mk_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn mk_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn mk_journald(filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    let journald = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?;
    Ok(journald.with_filter(filter).boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn mk_journald(_filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
