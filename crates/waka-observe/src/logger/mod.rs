mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;
pub use log::{BoxedLayer, build_subscriber};

/// Install the global subscriber with the console layer only.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    logger_init_with(cfg, Vec::new())
}

/// Install the global subscriber: the console layer plus `extra` layers,
/// each carrying its own filter.
pub fn logger_init_with(cfg: &LoggerConfig, extra: Vec<BoxedLayer>) -> Result<(), LoggerError> {
    let subscriber = build_subscriber(cfg, extra)?;
    tracing::subscriber::set_global_default(subscriber).map_err(|_| LoggerError::AlreadyInitialized)
}
