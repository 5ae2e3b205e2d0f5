//! Completion fan-out: each observer learns the final status once, then is closed.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use tracing::{debug, warn};
use waka_model::ExecStatus;

use crate::{
    connection::{CloseReason, Connection, ConnectionId},
    sync::lock,
};

/// Registry of connections waiting for a run's final status.
#[derive(Default)]
pub struct CompletionRegistry {
    observers: Mutex<HashMap<ConnectionId, Arc<dyn Connection>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn`. Re-adding the same id replaces the previous handle.
    pub fn add_observer(&self, conn: Arc<dyn Connection>) {
        lock(&self.observers).insert(conn.id(), conn);
    }

    /// Returns `true` if the observer was registered.
    pub fn remove_observer(&self, id: ConnectionId) -> bool {
        lock(&self.observers).remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Close every observer with `status` as the close reason.
    ///
    /// The observer set is drained first, so each connection is notified at
    /// most once and late removals become no-ops. Returns how many observers
    /// were closed successfully.
    pub fn notify(&self, status: ExecStatus) -> usize {
        let drained: Vec<_> = lock(&self.observers).drain().map(|(_, c)| c).collect();

        let mut delivered = 0;
        for conn in drained {
            if !conn.is_open() {
                debug!(connection = %conn.id(), %status, "observer already gone");
                continue;
            }
            match conn.close(CloseReason::Completed(status)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection = %conn.id(), %status, error = %e, "failed to deliver completion"),
            }
        }
        delivered
    }
}
