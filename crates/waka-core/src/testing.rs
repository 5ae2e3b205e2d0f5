use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use crate::connection::{CloseReason, Connection, ConnectionId, DeliveryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Text(String),
    Close(CloseReason),
}

/// In-memory connection that records everything delivered to it.
pub(crate) struct RecordingConnection {
    id: ConnectionId,
    open: AtomicBool,
    events: Mutex<Vec<Event>>,
}

impl RecordingConnection {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            open: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Text(t) => Some(t),
                Event::Close(_) => None,
            })
            .collect()
    }

    /// Simulate the peer going away without a close handshake.
    pub(crate) fn drop_link(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        self.events
            .lock()
            .unwrap()
            .push(Event::Text(text.to_string()));
        Ok(())
    }

    fn close(&self, reason: CloseReason) -> Result<(), DeliveryError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }
        self.events.lock().unwrap().push(Event::Close(reason));
        Ok(())
    }
}
