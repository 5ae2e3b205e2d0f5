//! Replayable fan-out of the current run's output.
//!
//! History append, live fan-out, and replay-then-register all happen under
//! one lock, so a subscriber sees every line exactly once and in publish
//! order no matter when it joins.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::{debug, trace};

use crate::{
    connection::{Connection, ConnectionId},
    sync::lock,
};

/// Ordered, replayable log stream fanned out to live connections.
#[derive(Default)]
pub struct LogBroadcast {
    inner: Mutex<Inner>,
    /// One send guard per connection, created on first send.
    send_guards: Mutex<HashMap<ConnectionId, Arc<Mutex<()>>>>,
}

#[derive(Default)]
struct Inner {
    /// Lines of the current run, in publish order.
    history: Vec<String>,
    subscribers: HashMap<ConnectionId, Arc<dyn Connection>>,
}

impl LogBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay the history to `conn`, then register it for live lines.
    pub fn subscribe(&self, conn: Arc<dyn Connection>) {
        let mut inner = lock(&self.inner);
        for line in &inner.history {
            self.deliver(conn.as_ref(), line);
        }
        trace!(connection = %conn.id(), replayed = inner.history.len(), "subscriber registered");
        inner.subscribers.insert(conn.id(), conn);
    }

    /// Stop live delivery to `id`. Idempotent.
    pub fn unsubscribe(&self, id: ConnectionId) {
        let removed = lock(&self.inner).subscribers.remove(&id).is_some();
        lock(&self.send_guards).remove(&id);
        if removed {
            trace!(connection = %id, "subscriber removed");
        }
    }

    /// Append `line` to the history and deliver it to every subscriber.
    pub fn publish(&self, line: impl Into<String>) {
        let line = line.into();
        let mut inner = lock(&self.inner);
        for conn in inner.subscribers.values() {
            self.deliver(conn.as_ref(), &line);
        }
        inner.history.push(line);
    }

    /// Empty the history. Subscriptions are untouched.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        let dropped = inner.history.len();
        inner.history.clear();
        trace!(dropped, "log history cleared");
    }

    pub fn history_len(&self) -> usize {
        lock(&self.inner).history.len()
    }

    pub fn history(&self) -> Vec<String> {
        lock(&self.inner).history.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// One in-flight send per connection; closed links are skipped quietly.
    fn deliver(&self, conn: &dyn Connection, line: &str) {
        if !conn.is_open() {
            return;
        }
        let guard = Arc::clone(lock(&self.send_guards).entry(conn.id()).or_default());
        let _sending = lock(&guard);
        if let Err(e) = conn.send_text(line) {
            debug!(connection = %conn.id(), error = %e, "unable to deliver log line");
        }
    }
}
