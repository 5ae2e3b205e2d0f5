//! Bridge from `tracing` to [`LogBroadcast`].
//!
//! Only events of one target are forwarded. The core logs its own diagnostics
//! under other targets, so publishing can never recurse into itself.

use std::{fmt, fmt::Write as _, sync::Arc};

use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, filter::Targets, layer::Context};
use waka_core::LogBroadcast;
use waka_model::OUTPUT_TARGET;

use crate::logger::BoxedLayer;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Exact target whose events reach clients.
    pub target: String,
    /// Least severe level forwarded.
    pub level: Level,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target: OUTPUT_TARGET.to_string(),
            level: Level::INFO,
        }
    }
}

/// Publishes one line per matching event.
pub struct LogStreamLayer {
    logs: Arc<LogBroadcast>,
    cfg: StreamConfig,
}

impl LogStreamLayer {
    pub fn new(logs: Arc<LogBroadcast>, cfg: StreamConfig) -> Self {
        Self { logs, cfg }
    }

    fn accepts(&self, target: &str, level: &Level) -> bool {
        target == self.cfg.target && *level <= self.cfg.level
    }
}

impl<S: Subscriber> Layer<S> for LogStreamLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !self.accepts(meta.target(), meta.level()) {
            return;
        }
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.logs.publish(line.finish());
    }
}

/// The stream layer behind a [`Targets`] filter, ready for
/// [`logger_init_with`](crate::logger_init_with).
pub fn stream_layer(logs: Arc<LogBroadcast>, cfg: &StreamConfig) -> BoxedLayer {
    let filter = Targets::new().with_target(cfg.target.clone(), cfg.level);
    LogStreamLayer::new(logs, cfg.clone()).with_filter(filter).boxed()
}

/// `message` first, then the remaining fields as `key=value`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}
